//! In-memory GPIO and transport doubles.
//!
//! Used by the unit tests here and by host-side crates (behind the `sim`
//! feature) to run command streams without hardware.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::task::Poll;

use crate::gpio::Gpio;
use crate::transport::Transport;
use crate::{GPIO_MASK, PACKET_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioOp {
    Direction(u8),
    Output(u8),
    /// Raw value returned by `read_input`, before any masking.
    Input(u8),
}

/// A one-wire shift register hanging off the port.
///
/// On each rising edge of `clock` the register captures the `data_out` pin,
/// unless `select` is high, in which case it presents the oldest captured bit
/// on `data_in` instead.
#[derive(Debug, Clone)]
pub struct Loopback {
    clock: u8,
    data_out: u8,
    data_in: u8,
    select: u8,
    bits: VecDeque<bool>,
    level: bool,
}

impl Loopback {
    pub fn new(clock: u8, data_out: u8, data_in: u8, select: u8) -> Self {
        Self {
            clock,
            data_out,
            data_in,
            select,
            bits: VecDeque::new(),
            level: false,
        }
    }

    fn edge(&mut self, latch: u8) {
        if latch & self.select != 0 {
            self.level = self.bits.pop_front().unwrap_or(false);
        } else {
            self.bits.push_back(latch & self.data_out != 0);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    ops: Vec<GpioOp>,
    direction: u8,
    latch: u8,
    default_input: u8,
    scripted: VecDeque<u8>,
    loopback: Option<Loopback>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self {
            direction: GPIO_MASK,
            ..Self::default()
        }
    }

    pub fn ops(&self) -> &[GpioOp] {
        &self.ops
    }

    pub fn direction(&self) -> u8 {
        self.direction
    }

    pub fn latch(&self) -> u8 {
        self.latch
    }

    /// Value returned once the scripted inputs run out.
    pub fn set_default_input(&mut self, value: u8) {
        self.default_input = value;
    }

    /// Queue a value for the next `read_input`.
    pub fn push_input(&mut self, value: u8) {
        self.scripted.push_back(value);
    }

    pub fn attach_loopback(&mut self, loopback: Loopback) {
        self.loopback = Some(loopback);
    }
}

impl Gpio for SimGpio {
    fn set_direction(&mut self, mask: u8) {
        self.direction = mask;
        self.ops.push(GpioOp::Direction(mask));
    }

    fn set_output(&mut self, value: u8) {
        if let Some(loopback) = self.loopback.as_mut() {
            if !self.latch & value & loopback.clock != 0 {
                loopback.edge(value);
            }
        }
        self.latch = value;
        self.ops.push(GpioOp::Output(value));
    }

    fn read_input(&mut self) -> u8 {
        let value = match self.scripted.pop_front() {
            Some(value) => value,
            None => match &self.loopback {
                Some(loopback) if loopback.level => self.default_input | loopback.data_in,
                _ => self.default_input,
            },
        };
        self.ops.push(GpioOp::Input(value));
        value
    }
}

/// A transport fed from a packet queue.
///
/// `receive_latency` makes each packet report `Pending` that many times before
/// it completes, and `set_tx_busy` holds the IN endpoint.
#[derive(Debug, Default)]
pub struct SimTransport {
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    receive_latency: u32,
    waited: u32,
    tx_busy: bool,
    services: usize,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_packet(&mut self, packet: &[u8]) {
        self.incoming.push_back(packet[..packet.len().min(PACKET_SIZE)].to_vec());
    }

    /// Split a byte stream into full-size packets.
    pub fn push_stream(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(PACKET_SIZE) {
            self.push_packet(chunk);
        }
    }

    pub fn set_receive_latency(&mut self, polls: u32) {
        self.receive_latency = polls;
    }

    pub fn set_tx_busy(&mut self, busy: bool) {
        self.tx_busy = busy;
    }

    pub fn pending_packets(&self) -> usize {
        self.incoming.len()
    }

    pub fn sent_packets(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Everything transmitted so far, packet boundaries removed.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.concat()
    }

    pub fn service_count(&self) -> usize {
        self.services
    }
}

impl Transport for SimTransport {
    fn service(&mut self) {
        self.services += 1;
    }

    fn poll_receive(&mut self, buf: &mut [u8; PACKET_SIZE]) -> Poll<usize> {
        if self.incoming.is_empty() {
            return Poll::Pending;
        }
        if self.waited < self.receive_latency {
            self.waited += 1;
            return Poll::Pending;
        }
        self.waited = 0;

        let Some(packet) = self.incoming.pop_front() else {
            return Poll::Pending;
        };
        buf[..packet.len()].copy_from_slice(&packet);
        Poll::Ready(packet.len())
    }

    fn tx_ready(&self) -> bool {
        !self.tx_busy
    }

    fn transmit(&mut self, data: &[u8]) {
        self.sent.push(data.to_vec());
    }
}
