//! Decoding of device response bytes.

use protocol::Status;

use crate::error::DecodeError;

pub fn decode_status(byte: u8) -> Result<Status, DecodeError> {
    Status::from_byte(byte).ok_or(DecodeError::InvalidStatus(byte))
}

/// Assemble `num_bits` (at most 64) LSB-first bits from ShiftIn response bytes.
pub fn bits_from_bytes(bytes: &[u8], num_bits: usize) -> Result<u64, DecodeError> {
    let num_bits = num_bits.min(64);
    let expected = num_bits.div_ceil(8);
    if bytes.len() != expected {
        return Err(DecodeError::UnexpectedLength {
            expected,
            actual: bytes.len(),
        });
    }

    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok(match num_bits {
        64 => value,
        n => value & ((1 << n) - 1),
    })
}

/// Split the low `num_bits` of `value` into LSB-first bytes.
pub fn bytes_from_bits(value: u64, num_bits: usize) -> Vec<u8> {
    let num_bits = num_bits.min(64);
    let value = match num_bits {
        64 => value,
        n => value & ((1 << n) - 1),
    };
    value.to_le_bytes()[..num_bits.div_ceil(8)].to_vec()
}
