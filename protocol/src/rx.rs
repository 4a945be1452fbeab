//! Ping-pong receive buffers.
//!
//! The transport fills one buffer while the engine drains the other. Each
//! buffer cycles `Free -> Filling -> Filled -> Draining -> Free`, and the
//! fill and drain sides each walk the ring in order, so neither side ever
//! touches a buffer the other one owns.

use core::task::Poll;

use log::{trace, warn};

use crate::engine::CommandInput;
use crate::transport::Transport;
use crate::{PACKET_SIZE, RX_BUFFER_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferState {
    Free,
    /// Handed to the transport, reception not yet complete.
    Filling,
    Filled { len: usize },
    /// Exposed to the engine; the cursor lives in [`RxQueue`].
    Draining { len: usize },
}

pub struct RxQueue {
    buffers: [[u8; PACKET_SIZE]; RX_BUFFER_COUNT],
    states: [BufferState; RX_BUFFER_COUNT],
    fill_slot: usize,
    drain_slot: usize,
    cursor: usize,
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

const fn next(slot: usize) -> usize {
    (slot + 1) % RX_BUFFER_COUNT
}

impl RxQueue {
    pub const fn new() -> Self {
        Self {
            buffers: [[0; PACKET_SIZE]; RX_BUFFER_COUNT],
            states: [BufferState::Free; RX_BUFFER_COUNT],
            fill_slot: 0,
            drain_slot: 0,
            cursor: 0,
        }
    }

    pub fn states(&self) -> &[BufferState; RX_BUFFER_COUNT] {
        &self.states
    }

    /// Buffers currently owned by the transport or holding unread data.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state != BufferState::Free)
            .count()
    }

    /// Arm the next free buffer for reception and collect a completed one.
    ///
    /// A zero-length completion leaves the same buffer armed.
    pub fn fill<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        let slot = self.fill_slot;
        match self.states[slot] {
            BufferState::Free => self.states[slot] = BufferState::Filling,
            BufferState::Filling => {}
            BufferState::Filled { .. } | BufferState::Draining { .. } => return,
        }

        match transport.poll_receive(&mut self.buffers[slot]) {
            Poll::Pending => {}
            Poll::Ready(0) => trace!("rx slot {}: empty packet, re-armed", slot),
            Poll::Ready(len) => {
                let len = len.min(PACKET_SIZE);
                trace!("rx slot {}: {} bytes", slot, len);
                self.states[slot] = BufferState::Filled { len };
                self.fill_slot = next(slot);
            }
        }
    }

    /// Release a fully consumed buffer and expose the next filled one.
    pub fn drain(&mut self) {
        let slot = self.drain_slot;
        if let BufferState::Draining { len } = self.states[slot] {
            if self.cursor < len {
                return;
            }
            self.states[slot] = BufferState::Free;
            self.drain_slot = next(slot);
            self.cursor = 0;
        }

        let slot = self.drain_slot;
        if let BufferState::Filled { len } = self.states[slot] {
            self.states[slot] = BufferState::Draining { len };
            self.cursor = 0;
        }
    }
}

impl CommandInput for RxQueue {
    fn read_byte(&mut self) -> Option<u8> {
        match self.states[self.drain_slot] {
            BufferState::Draining { len } if self.cursor < len => {
                let byte = self.buffers[self.drain_slot][self.cursor];
                self.cursor += 1;
                Some(byte)
            }
            _ => None,
        }
    }

    fn position(&self) -> usize {
        self.cursor
    }

    fn rewind(&mut self, position: usize) {
        let BufferState::Draining { len } = self.states[self.drain_slot] else {
            warn!("rewind with no packet exposed");
            return;
        };
        if position > len {
            warn!("rewind to {} clamped to packet length {}", position, len);
        }
        self.cursor = position.min(len);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sim::SimTransport;

    fn read_all(rx: &mut RxQueue) -> alloc::vec::Vec<u8> {
        core::iter::from_fn(|| rx.read_byte()).collect()
    }

    #[test]
    fn packets_are_drained_in_arrival_order() {
        let mut transport = SimTransport::new();
        transport.push_packet(&[1, 2]);
        transport.push_packet(&[3]);
        let mut rx = RxQueue::new();

        rx.fill(&mut transport);
        rx.fill(&mut transport);
        assert_eq!(rx.in_flight(), 2);

        rx.drain();
        assert_eq!(read_all(&mut rx), [1, 2]);
        rx.drain();
        assert_eq!(read_all(&mut rx), [3]);
        rx.drain();
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn never_more_than_two_buffers_in_flight() {
        let mut transport = SimTransport::new();
        for i in 0..10u8 {
            transport.push_packet(&[i; 3]);
        }
        let mut rx = RxQueue::new();
        let mut seen = alloc::vec::Vec::new();

        for _ in 0..100 {
            rx.fill(&mut transport);
            rx.fill(&mut transport);
            assert!(rx.in_flight() <= RX_BUFFER_COUNT);
            rx.drain();
            // the engine only ever sees a drained buffer
            if let Some(byte) = rx.read_byte() {
                seen.push(byte);
            }
        }

        let expected: alloc::vec::Vec<u8> = (0..10u8).flat_map(|i| [i; 3]).collect();
        assert_eq!(seen, expected);
        assert_eq!(transport.pending_packets(), 0);
    }

    #[test]
    fn full_queue_stops_accepting_packets() {
        let mut transport = SimTransport::new();
        transport.push_stream(&[0; 3 * PACKET_SIZE]);
        let mut rx = RxQueue::new();

        for _ in 0..5 {
            rx.fill(&mut transport);
        }
        assert_eq!(transport.pending_packets(), 1);
        assert!(
            rx.states()
                .iter()
                .all(|state| *state == BufferState::Filled { len: PACKET_SIZE })
        );
    }

    #[test]
    fn zero_length_packet_rearms_same_slot() {
        let mut transport = SimTransport::new();
        transport.push_packet(&[]);
        transport.push_packet(&[7]);
        let mut rx = RxQueue::new();

        rx.fill(&mut transport);
        assert_eq!(rx.states()[0], BufferState::Filling);
        rx.fill(&mut transport);
        assert_eq!(rx.states()[0], BufferState::Filled { len: 1 });

        rx.drain();
        assert_eq!(rx.read_byte(), Some(7));
    }

    #[test]
    fn pending_receive_keeps_buffer_with_transport() {
        let mut transport = SimTransport::new();
        transport.set_receive_latency(1);
        transport.push_packet(&[9]);
        let mut rx = RxQueue::new();

        rx.fill(&mut transport);
        rx.drain();
        assert_eq!(rx.read_byte(), None);
        assert_eq!(rx.states()[0], BufferState::Filling);

        rx.fill(&mut transport);
        rx.drain();
        assert_eq!(rx.read_byte(), Some(9));
    }

    #[test]
    fn buffer_is_held_until_fully_read() {
        let mut transport = SimTransport::new();
        transport.push_packet(&[1, 2, 3]);
        let mut rx = RxQueue::new();
        rx.fill(&mut transport);
        rx.drain();

        assert_eq!(rx.read_byte(), Some(1));
        rx.drain();
        assert_eq!(rx.states()[0], BufferState::Draining { len: 3 });
        assert_eq!(rx.read_byte(), Some(2));
        assert_eq!(rx.read_byte(), Some(3));
    }

    #[test]
    fn rewind_is_clamped_to_packet() {
        let mut transport = SimTransport::new();
        transport.push_packet(&[1, 2, 3]);
        let mut rx = RxQueue::new();
        rx.fill(&mut transport);
        rx.drain();

        read_all(&mut rx);
        rx.rewind(1);
        assert_eq!(rx.read_byte(), Some(2));
        rx.rewind(40);
        assert_eq!(rx.position(), 3);
        assert_eq!(rx.read_byte(), None);
    }
}
