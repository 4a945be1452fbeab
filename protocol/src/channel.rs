//! Shift channel configuration.
//!
//! A Configure-Channel command carries seven bytes, stored verbatim apart from
//! the config byte which collapses into a [`ChannelMode`]:
//!
//! | offset | field |
//! |---|---|
//! | 0 | config flags (low nibble) |
//! | 1 | input sample mask |
//! | 2, 3 | phase 0 / phase 1 drive for a 0 bit |
//! | 4, 5 | phase 0 / phase 1 drive for a 1 bit (ShiftOut) |
//! | 6 | overlay OR-ed onto both phases of the final bit |

use crate::CHANNEL_COUNT;
use crate::command::CHANNEL_CONFIG_LEN;

pub const FLAG_SENDS_OUTPUT: u8 = 0b0001;
pub const FLAG_INPUT_ON_PHASE0: u8 = 0b0010;
pub const FLAG_INPUT_ON_PHASE1: u8 = 0b0100;
pub const FLAG_HAS_INPUT_MASK: u8 = 0b1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    /// Clock pulses only, nothing exchanged with the host.
    #[default]
    DriveOnly,
    /// Host supplies data bytes, driven out LSB first.
    ShiftOut,
    /// Input sampled each bit and returned to the host.
    ShiftIn,
    /// Input sampled and checked against host-supplied (expected, mask) pairs.
    ShiftCompare,
}

impl ChannelMode {
    pub const fn from_flags(flags: u8) -> Self {
        if flags & FLAG_HAS_INPUT_MASK != 0 {
            ChannelMode::ShiftCompare
        } else if flags & FLAG_SENDS_OUTPUT != 0 {
            ChannelMode::ShiftOut
        } else if flags & (FLAG_INPUT_ON_PHASE0 | FLAG_INPUT_ON_PHASE1) != 0 {
            ChannelMode::ShiftIn
        } else {
            ChannelMode::DriveOnly
        }
    }

    /// Canonical flag encoding for this mode.
    pub const fn flags(self) -> u8 {
        match self {
            ChannelMode::DriveOnly => 0,
            ChannelMode::ShiftOut => FLAG_SENDS_OUTPUT,
            ChannelMode::ShiftIn => FLAG_INPUT_ON_PHASE1,
            ChannelMode::ShiftCompare => FLAG_INPUT_ON_PHASE1 | FLAG_HAS_INPUT_MASK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    InvalidChannel(u8),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidChannel(id) => write!(f, "channel {id} out of range"),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Drive patterns for one phase pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phases {
    pub phase0: u8,
    pub phase1: u8,
}

impl Phases {
    pub const fn new(phase0: u8, phase1: u8) -> Self {
        Self { phase0, phase1 }
    }

    pub const fn overlay(self, bits: u8) -> Self {
        Self {
            phase0: self.phase0 | bits,
            phase1: self.phase1 | bits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub input_mask: u8,
    pub zero: Phases,
    pub one: Phases,
    pub last_overlay: u8,
}

impl ChannelConfig {
    /// Configuration every channel holds until the host writes one.
    pub const EMPTY: Self = Self {
        mode: ChannelMode::DriveOnly,
        input_mask: 0,
        zero: Phases::new(0, 0),
        one: Phases::new(0, 0),
        last_overlay: 0,
    };

    pub const fn from_bytes(raw: [u8; CHANNEL_CONFIG_LEN]) -> Self {
        Self {
            mode: ChannelMode::from_flags(raw[0]),
            input_mask: raw[1],
            zero: Phases::new(raw[2], raw[3]),
            one: Phases::new(raw[4], raw[5]),
            last_overlay: raw[6],
        }
    }

    pub const fn to_bytes(&self) -> [u8; CHANNEL_CONFIG_LEN] {
        [
            self.mode.flags(),
            self.input_mask,
            self.zero.phase0,
            self.zero.phase1,
            self.one.phase0,
            self.one.phase1,
            self.last_overlay,
        ]
    }

    /// Phase pair used to clock a bit with the given value.
    pub const fn phases_for(&self, bit: bool) -> Phases {
        if bit { self.one } else { self.zero }
    }
}

pub fn check_channel(id: u8) -> Result<u8, ConfigError> {
    if (id as usize) < CHANNEL_COUNT {
        Ok(id)
    } else {
        Err(ConfigError::InvalidChannel(id))
    }
}
