//! Error types for host-side encoding and decoding

/// Reasons an operation cannot be encoded into a command stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Channel id outside 0..=7
    InvalidChannel(u8),

    /// Shift on a channel that was never configured in this stream
    ChannelNotConfigured(u8),

    /// Shift length outside 1..=2048 bits
    InvalidBitCount(u16),

    /// Loop-Begin while a loop body is open
    NestedLoop,

    /// Loop-End with no open loop body
    NotInLoop,

    /// The loop body does not fit in one packet
    LoopTooLarge,

    /// Operation would repeat its response or side effect on every iteration
    NotAllowedInLoop(&'static str),

    /// Stream finished with a loop body still open
    UnterminatedLoop,
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidChannel(id) => write!(f, "channel {} out of range", id),
            Self::ChannelNotConfigured(id) => write!(f, "channel {} is not configured", id),
            Self::InvalidBitCount(n) => write!(f, "cannot shift {} bits (1..=2048)", n),
            Self::NestedLoop => write!(f, "loops cannot be nested"),
            Self::NotInLoop => write!(f, "end of loop without a loop"),
            Self::LoopTooLarge => write!(f, "loop body does not fit in one packet"),
            Self::NotAllowedInLoop(op) => write!(f, "{} is not allowed inside a loop", op),
            Self::UnterminatedLoop => write!(f, "loop was never closed"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Malformed device responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Wrong number of response bytes
    UnexpectedLength { expected: usize, actual: usize },

    /// Status byte other than 0 or 1
    InvalidStatus(u8),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnexpectedLength { expected, actual } => {
                write!(f, "expected {} response bytes, got {}", expected, actual)
            }
            Self::InvalidStatus(byte) => write!(f, "invalid status byte {:#04x}", byte),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Problems in a JEDEC fuse file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JedecError {
    /// Fuse strings may only hold `0` and `1`
    InvalidFuse(char),

    /// Fuse string of the wrong length for its field
    RowWidth { expected: usize, actual: usize },

    /// `E` field without both the feature row and the feature bits
    MalformedFeatureRow,

    /// No configuration rows
    MissingConfigData,

    /// No `E` field
    MissingFeatureRow,
}

impl core::fmt::Display for JedecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidFuse(c) => write!(f, "invalid fuse character {:?}", c),
            Self::RowWidth { expected, actual } => {
                write!(f, "expected {} fuses in a row, found {}", expected, actual)
            }
            Self::MalformedFeatureRow => write!(f, "feature row field is incomplete"),
            Self::MissingConfigData => write!(f, "no configuration data"),
            Self::MissingFeatureRow => write!(f, "no feature row"),
        }
    }
}

impl std::error::Error for JedecError {}

/// A programming run stopped short
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// The device reported Fail while this stage was running
    Failed(crate::machxo2::Stage),

    /// More status bytes than the plan asked for
    UnexpectedResponse(u8),

    Decode(DecodeError),
}

impl From<DecodeError> for ProgramError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl core::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Failed(stage) => write!(f, "device reported failure while {}", stage),
            Self::UnexpectedResponse(byte) => write!(f, "unexpected response byte {:#04x}", byte),
            Self::Decode(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ProgramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}
