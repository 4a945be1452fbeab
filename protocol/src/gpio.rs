use crate::channel::ChannelConfig;
use crate::{CHANNEL_COUNT, GPIO_MASK};

/// The three GPIO ports the engine drives.
///
/// Register-level details belong to the implementor. A direction bit of 1
/// makes the pin an input.
pub trait Gpio {
    fn set_direction(&mut self, mask: u8);
    fn set_output(&mut self, value: u8);
    fn read_input(&mut self) -> u8;
}

impl<G: Gpio + ?Sized> Gpio for &mut G {
    fn set_direction(&mut self, mask: u8) {
        (**self).set_direction(mask)
    }

    fn set_output(&mut self, value: u8) {
        (**self).set_output(value)
    }

    fn read_input(&mut self) -> u8 {
        (**self).read_input()
    }
}

/// Process-wide port configuration: channel table, pin directions and the
/// last value written to the output latch.
///
/// Only the [`Engine`](crate::Engine) mutates this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortState {
    pub channels: [ChannelConfig; CHANNEL_COUNT],
    direction: u8,
    latch: u8,
}

impl Default for PortState {
    fn default() -> Self {
        Self::new()
    }
}

impl PortState {
    /// All pins start as inputs with a cleared latch.
    pub const fn new() -> Self {
        Self {
            channels: [ChannelConfig::EMPTY; CHANNEL_COUNT],
            direction: GPIO_MASK,
            latch: 0,
        }
    }

    pub const fn direction(&self) -> u8 {
        self.direction
    }

    pub const fn latch(&self) -> u8 {
        self.latch
    }

    /// Push the current direction mask to the hardware.
    pub fn apply_direction<G: Gpio + ?Sized>(&mut self, gpio: &mut G, mask: u8) {
        self.direction = mask & GPIO_MASK;
        gpio.set_direction(self.direction);
    }

    /// Write `value` to the output latch; bits configured as inputs keep
    /// their previous latch value.
    pub fn drive<G: Gpio + ?Sized>(&mut self, gpio: &mut G, value: u8) {
        self.latch = (value & !self.direction & GPIO_MASK) | (self.latch & self.direction);
        gpio.set_output(self.latch);
    }

    /// Sample the input port, keeping only pins configured as inputs.
    pub fn sample_inputs<G: Gpio + ?Sized>(&self, gpio: &mut G) -> u8 {
        gpio.read_input() & self.direction
    }
}
