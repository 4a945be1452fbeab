//! Host side of the Shifty USB GPIO shift engine.
//!
//! [`Programmer`] encodes pin, channel, shift and loop operations into a
//! [`Batch`] of packets, [`response`] turns the bytes the device sends back
//! into values, and [`jtag`] drives a JTAG TAP through a fixed set of shift
//! channels. [`machxo2`] builds a complete flash programming run for a
//! Lattice MachXO2 from a parsed [`jedec`] file.

pub mod error;
pub mod jedec;
pub mod jtag;
pub mod machxo2;
pub mod programmer;
pub mod response;

pub use error::{DecodeError, EncodeError, JedecError, ProgramError};
pub use jedec::JedecFile;
pub use jtag::{Jtag, TapState};
pub use machxo2::{Checkpoint, ProgramPlan, ProgressTracker, Stage, program};
pub use programmer::{Batch, HOST_PACKET_SIZE, MAX_SHIFT_BITS, Programmer, split_bits};
pub use response::{bits_from_bytes, bytes_from_bits, decode_status};
