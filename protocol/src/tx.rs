use log::{trace, warn};

use crate::PACKET_SIZE;
use crate::engine::ResponseOutput;
use crate::transport::Transport;

/// Accumulates response bytes until the transport can take them.
pub struct TxBuffer {
    data: [u8; PACKET_SIZE],
    len: usize,
}

impl Default for TxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TxBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0; PACKET_SIZE],
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Hand the pending bytes to the transport if it is ready for them.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        if self.len == 0 || !transport.tx_ready() {
            return false;
        }
        trace!("tx {} bytes", self.len);
        transport.transmit(&self.data[..self.len]);
        self.len = 0;
        true
    }
}

impl ResponseOutput for TxBuffer {
    fn room_for_write(&self) -> bool {
        self.len < PACKET_SIZE
    }

    fn write_byte(&mut self, byte: u8) {
        match self.data.get_mut(self.len) {
            Some(slot) => {
                *slot = byte;
                self.len += 1;
            }
            None => warn!("tx buffer full, dropping {:#04x}", byte),
        }
    }
}
