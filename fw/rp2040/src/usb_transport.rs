use core::task::Poll;

use defmt::{debug, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_usb::class::cdc_acm::{Receiver, Sender};
use embassy_usb::driver::{Driver, EndpointError};
use protocol::{Transport, PACKET_SIZE};

/// A USB packet: payload length plus the endpoint-sized buffer it lives in.
pub type Packet = (usize, [u8; PACKET_SIZE]);

// One slot each way. The engine side owns the ping-pong buffers, so anything
// deeper here would only hide backpressure from the host.
static RX_PACKETS: Channel<CriticalSectionRawMutex, Packet, 1> = Channel::new();
static TX_PACKETS: Channel<CriticalSectionRawMutex, Packet, 1> = Channel::new();

/// Engine-facing end of the USB endpoints.
///
/// Never blocks: receives and transmits are `try_` operations on the packet
/// channels, which the [`reader`] and [`writer`] tasks keep moving.
pub struct ChannelTransport;

impl ChannelTransport {
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for ChannelTransport {
    fn poll_receive(&mut self, buf: &mut [u8; PACKET_SIZE]) -> Poll<usize> {
        match RX_PACKETS.try_receive() {
            Ok((len, packet)) => {
                buf[..len].copy_from_slice(&packet[..len]);
                Poll::Ready(len)
            }
            Err(_) => Poll::Pending,
        }
    }

    fn tx_ready(&self) -> bool {
        TX_PACKETS.is_empty()
    }

    fn transmit(&mut self, data: &[u8]) {
        let mut packet = [0u8; PACKET_SIZE];
        packet[..data.len()].copy_from_slice(data);
        if TX_PACKETS.try_send((data.len(), packet)).is_err() {
            warn!("tx channel busy, dropped {} bytes", data.len());
        }
    }
}

/// Moves OUT packets from the CDC endpoint into the receive channel.
pub async fn reader<'d, D: Driver<'d>>(mut rx: Receiver<'d, D>) -> ! {
    loop {
        rx.wait_connection().await;
        info!("host connected");

        loop {
            let mut packet = [0u8; PACKET_SIZE];
            match rx.read_packet(&mut packet).await {
                Ok(len) => RX_PACKETS.send((len, packet)).await,
                Err(EndpointError::Disabled) => break,
                Err(EndpointError::BufferOverflow) => warn!("oversized OUT packet dropped"),
            }
        }

        info!("host disconnected");
    }
}

/// Drains the transmit channel onto the CDC IN endpoint.
///
/// A write only returns once the host has taken the packet, so a host that
/// stops reading holds the engine at its next response wait-point.
pub async fn writer<'d, D: Driver<'d>>(mut tx: Sender<'d, D>) -> ! {
    loop {
        let (len, packet) = TX_PACKETS.receive().await;
        if let Err(err) = tx.write_packet(&packet[..len]).await {
            warn!("dropped {} response bytes: {}", len, err);
            continue;
        }
        // A full packet leaves the host waiting for more unless the transfer
        // is terminated.
        if len == PACKET_SIZE {
            debug!("terminating full packet");
            if let Err(err) = tx.write_packet(&[]).await {
                warn!("zero-length packet failed: {}", err);
            }
        }
    }
}
