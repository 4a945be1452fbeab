use embassy_rp::gpio::{Flex, Level};
use protocol::Gpio;

pub const PIN_COUNT: usize = 6;

/// The six-pin shift port, bit `n` of every mask mapping to `pins[n]`.
pub struct FlexPort<'d> {
    pins: [Flex<'d>; PIN_COUNT],
}

impl<'d> FlexPort<'d> {
    pub fn new(pins: [Flex<'d>; PIN_COUNT]) -> Self {
        Self { pins }
    }
}

impl Gpio for FlexPort<'_> {
    fn set_direction(&mut self, mask: u8) {
        for (bit, pin) in self.pins.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                pin.set_as_input();
            } else {
                pin.set_as_output();
            }
        }
    }

    fn set_output(&mut self, value: u8) {
        for (bit, pin) in self.pins.iter_mut().enumerate() {
            pin.set_level(Level::from(value & (1 << bit) != 0));
        }
    }

    fn read_input(&mut self) -> u8 {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, pin)| pin.is_high())
            .fold(0, |acc, (bit, _)| acc | (1 << bit))
    }
}
