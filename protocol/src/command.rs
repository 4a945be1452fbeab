//! Command byte layout.
//!
//! ```text
//! 01vvvvvv  Set                 output latch <- v (output pins only)
//! 10vvvvvv  SetGet              sample inputs, respond, then Set
//! 11xxxxxx  reserved            consumed, ignored
//! 00011ccc  Shift(ccc)          num_bits, num_bytes, mode-dependent payload
//! 00010000  Loop-Begin          count_lo, count_hi
//! 00010001  Loop-End
//! 00001ccc  Configure-Channel   7 config bytes
//! 00100000  Clear-Status
//! 00100001  Get-Status          one status byte
//! 00xxxxxx  Configure-IO        one direction byte (everything else)
//! ```

pub const SET: u8 = 0b0100_0000;
pub const SET_GET: u8 = 0b1000_0000;
pub const SHIFT: u8 = 0b0001_1000;
pub const LOOP_BEGIN: u8 = 0b0001_0000;
pub const LOOP_END: u8 = 0b0001_0001;
pub const CONFIGURE_CHANNEL: u8 = 0b0000_1000;
pub const CLEAR_STATUS: u8 = 0b0010_0000;
pub const GET_STATUS: u8 = 0b0010_0001;
pub const CONFIGURE_IO: u8 = 0b0000_0000;

const KIND_MASK: u8 = 0b1100_0000;
const CHANNEL_CLASS_MASK: u8 = 0b1111_1000;
const CHANNEL_ID_MASK: u8 = 0b0000_0111;
const VALUE_MASK: u8 = 0b0011_1111;

/// Number of follow-up bytes a Configure-Channel command carries.
pub const CHANNEL_CONFIG_LEN: usize = 7;

/// A decoded leading command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Set(u8),
    SetGet(u8),
    Shift { channel: u8 },
    LoopBegin,
    LoopEnd,
    ConfigureChannel { channel: u8 },
    ClearStatus,
    GetStatus,
    ConfigureIo,
    Reserved(u8),
}

impl Command {
    pub const fn decode(byte: u8) -> Self {
        match byte & KIND_MASK {
            SET => return Command::Set(byte & VALUE_MASK),
            SET_GET => return Command::SetGet(byte & VALUE_MASK),
            KIND_MASK => return Command::Reserved(byte),
            _ => {}
        }

        match byte {
            LOOP_BEGIN => Command::LoopBegin,
            LOOP_END => Command::LoopEnd,
            CLEAR_STATUS => Command::ClearStatus,
            GET_STATUS => Command::GetStatus,
            _ if byte & CHANNEL_CLASS_MASK == SHIFT => Command::Shift {
                channel: byte & CHANNEL_ID_MASK,
            },
            _ if byte & CHANNEL_CLASS_MASK == CONFIGURE_CHANNEL => Command::ConfigureChannel {
                channel: byte & CHANNEL_ID_MASK,
            },
            _ => Command::ConfigureIo,
        }
    }

    /// Encode the leading byte. Out-of-range values and channel ids are masked.
    pub const fn encode(self) -> u8 {
        match self {
            Command::Set(value) => SET | (value & VALUE_MASK),
            Command::SetGet(value) => SET_GET | (value & VALUE_MASK),
            Command::Shift { channel } => SHIFT | (channel & CHANNEL_ID_MASK),
            Command::LoopBegin => LOOP_BEGIN,
            Command::LoopEnd => LOOP_END,
            Command::ConfigureChannel { channel } => {
                CONFIGURE_CHANNEL | (channel & CHANNEL_ID_MASK)
            }
            Command::ClearStatus => CLEAR_STATUS,
            Command::GetStatus => GET_STATUS,
            Command::ConfigureIo => CONFIGURE_IO,
            Command::Reserved(byte) => byte,
        }
    }
}
