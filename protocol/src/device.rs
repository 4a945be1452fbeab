use log::debug;

use crate::engine::{Engine, Progress, Status};
use crate::gpio::{Gpio, PortState};
use crate::rx::RxQueue;
use crate::transport::Transport;
use crate::tx::TxBuffer;
use crate::GPIO_MASK;

/// Everything the firmware main loop owns, wired together.
///
/// Each [`poll`](Device::poll) services the transport, moves packets through
/// the receive queue, gives the engine one quantum and flushes any responses.
pub struct Device<T, G> {
    transport: T,
    gpio: G,
    port: PortState,
    engine: Engine,
    rx: RxQueue,
    tx: TxBuffer,
}

impl<T: Transport, G: Gpio> Device<T, G> {
    /// Takes over the port with every pin configured as an input.
    pub fn new(transport: T, mut gpio: G) -> Self {
        let mut port = PortState::new();
        port.apply_direction(&mut gpio, GPIO_MASK);
        debug!("device up, direction {:#04x}", port.direction());
        Self {
            transport,
            gpio,
            port,
            engine: Engine::new(),
            rx: RxQueue::new(),
            tx: TxBuffer::new(),
        }
    }

    pub fn poll(&mut self) -> Progress {
        self.transport.service();
        self.rx.fill(&mut self.transport);
        self.rx.drain();
        let progress = self.engine.advance(
            &mut self.port,
            &mut self.rx,
            &mut self.tx,
            &mut self.gpio,
        );
        self.tx.flush(&mut self.transport);
        progress
    }

    pub fn status(&self) -> Status {
        self.engine.status()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn port(&self) -> &PortState {
        &self.port
    }

    pub fn rx(&self) -> &RxQueue {
        &self.rx
    }

    pub fn tx(&self) -> &TxBuffer {
        &self.tx
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }
}
