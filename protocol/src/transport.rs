//! Boundary to the USB CDC data endpoints.

use core::task::Poll;

use crate::PACKET_SIZE;

/// Packet-level, non-blocking view of the USB virtual serial transport.
///
/// Enumeration, descriptors and CDC class requests stay behind this trait.
/// The transport delivers bytes in order and without loss, in packet-sized
/// chunks.
pub trait Transport {
    /// Give the transport its own quantum of the poll loop.
    fn service(&mut self) {}

    /// Poll the OUT transfer currently receiving into `buf`.
    ///
    /// Returns the received length once the transfer completes. A completed
    /// transfer may have length zero.
    fn poll_receive(&mut self, buf: &mut [u8; PACKET_SIZE]) -> Poll<usize>;

    /// `true` once the previous IN transfer has completed (or none is pending).
    fn tx_ready(&self) -> bool;

    /// Start an IN transfer of `data`. Only called while [`tx_ready`](Self::tx_ready).
    fn transmit(&mut self, data: &[u8]);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn service(&mut self) {
        (**self).service()
    }

    fn poll_receive(&mut self, buf: &mut [u8; PACKET_SIZE]) -> Poll<usize> {
        (**self).poll_receive(buf)
    }

    fn tx_ready(&self) -> bool {
        (**self).tx_ready()
    }

    fn transmit(&mut self, data: &[u8]) {
        (**self).transmit(data)
    }
}
