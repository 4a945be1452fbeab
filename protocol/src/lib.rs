//! Device side of the Shifty USB GPIO shift engine.
//!
//! The host streams single-byte commands (plus their follow-up bytes) over a USB
//! virtual serial port. [`Device::poll`] runs one round of the cooperative
//! scheduler: the transport gets serviced, the receive ping-pong buffers are
//! refilled and drained, the [`Engine`] makes one bounded quantum of progress,
//! and pending response bytes are flushed back to the host.
//!
//! Nothing in here blocks. Every wait-point (next command byte, room in the
//! transmit packet, a USB transfer still in flight) returns to the caller and
//! resumes from the same place on the next poll.
#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod channel;
pub mod command;
pub mod device;
pub mod engine;
pub mod gpio;
pub mod rx;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod transport;
pub mod tx;

pub use channel::{ChannelConfig, ChannelMode, ConfigError};
pub use command::Command;
pub use device::Device;
pub use engine::{CommandInput, Engine, Progress, ResponseOutput, Status};
pub use gpio::{Gpio, PortState};
pub use rx::{BufferState, RxQueue};
pub use transport::Transport;
pub use tx::TxBuffer;

/// Size of one full-speed bulk packet on the CDC data endpoints.
pub const PACKET_SIZE: usize = 64;

/// Number of independently configured shift channels.
pub const CHANNEL_COUNT: usize = 8;

/// The GPIO port is six pins wide.
pub const GPIO_MASK: u8 = 0x3f;

/// Depth of the receive ping-pong queue.
pub const RX_BUFFER_COUNT: usize = 2;

/// USB identity the firmware enumerates with and the host looks for.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x2101;
