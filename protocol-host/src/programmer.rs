//! Command stream encoder.
//!
//! [`Programmer`] turns host operations into command bytes and groups them
//! into packets the device can take in one OUT transfer each.

use log::debug;
use protocol::channel::check_channel;
use protocol::command::{CHANNEL_CONFIG_LEN, LOOP_END};
use protocol::{CHANNEL_COUNT, ChannelConfig, ChannelMode, Command, GPIO_MASK, PACKET_SIZE};

use crate::error::EncodeError;

/// Host packets stay one byte short of a full USB packet, so no transfer ever
/// needs a trailing zero-length packet.
pub const HOST_PACKET_SIZE: usize = PACKET_SIZE - 1;

/// Longest shift one command can describe: 255 full bytes plus an 8-bit tail.
pub const MAX_SHIFT_BITS: u16 = 2048;

/// Encoded packets and how many response bytes they ask for.
///
/// `expected_responses` only counts solicited bytes (SetGet, Get-Status,
/// ShiftIn data). Fail notifications from compares come on top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub packets: Vec<Vec<u8>>,
    pub expected_responses: usize,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The whole stream, packet boundaries removed.
    pub fn bytes(&self) -> Vec<u8> {
        self.packets.concat()
    }
}

/// Split a shift length into the `(num_bits, num_bytes)` header pair, or
/// `None` outside `1..=MAX_SHIFT_BITS`.
///
/// The tail always holds 1 to 8 bits, so a multiple of eight ends in a full
/// tail byte.
pub const fn split_bits(num_bits: u16) -> Option<(u8, u8)> {
    if num_bits == 0 || num_bits > MAX_SHIFT_BITS {
        return None;
    }
    let full = (num_bits - 1) / 8;
    Some(((num_bits - 8 * full) as u8, full as u8))
}

fn byte_at(bytes: &[u8], index: usize) -> u8 {
    bytes.get(index).copied().unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct Programmer {
    packets: Vec<Vec<u8>>,
    current: Vec<u8>,
    modes: [Option<ChannelMode>; CHANNEL_COUNT],
    in_loop: bool,
    expected_responses: usize,
}

impl Programmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected_responses(&self) -> usize {
        self.expected_responses
    }

    pub fn in_loop(&self) -> bool {
        self.in_loop
    }

    pub fn channel_mode(&self, id: u8) -> Option<ChannelMode> {
        self.modes.get(id as usize).copied().flatten()
    }

    /// Set pin directions; a 1 bit makes the pin an input.
    pub fn configure_io(&mut self, directions: u8) -> Result<(), EncodeError> {
        self.reject_in_loop("Configure-IO")?;
        self.emit(&[Command::ConfigureIo.encode(), directions & GPIO_MASK])
    }

    pub fn set(&mut self, value: u8) -> Result<(), EncodeError> {
        self.emit(&[Command::Set(value).encode()])
    }

    /// Sample the inputs, then drive `value`. Answers one byte.
    pub fn set_get(&mut self, value: u8) -> Result<(), EncodeError> {
        self.reject_in_loop("Set-Get")?;
        self.emit(&[Command::SetGet(value).encode()])?;
        self.expected_responses += 1;
        Ok(())
    }

    pub fn configure_channel(&mut self, id: u8, config: &ChannelConfig) -> Result<(), EncodeError> {
        self.reject_in_loop("Configure-Channel")?;
        let channel = check_channel(id).map_err(|_| EncodeError::InvalidChannel(id))?;

        let mut bytes = [0; 1 + CHANNEL_CONFIG_LEN];
        bytes[0] = Command::ConfigureChannel { channel }.encode();
        bytes[1..].copy_from_slice(&config.to_bytes());
        self.emit(&bytes)?;

        self.modes[channel as usize] = Some(config.mode);
        Ok(())
    }

    /// Shift `num_bits` through channel `id`.
    ///
    /// `data` and `mask` are LSB-first byte strings, zero-extended as needed.
    /// What gets sent depends on how the channel was configured: ShiftOut
    /// sends `data`, ShiftCompare sends interleaved `(data, mask)` pairs and
    /// ShiftIn sends nothing but solicits one response byte per 8 bits.
    pub fn shift(
        &mut self,
        id: u8,
        num_bits: u16,
        data: &[u8],
        mask: &[u8],
    ) -> Result<(), EncodeError> {
        let channel = check_channel(id).map_err(|_| EncodeError::InvalidChannel(id))?;
        let mode = self.modes[channel as usize].ok_or(EncodeError::ChannelNotConfigured(id))?;
        let (tail, full) = split_bits(num_bits).ok_or(EncodeError::InvalidBitCount(num_bits))?;
        if mode == ChannelMode::ShiftIn {
            self.reject_in_loop("Shift-In")?;
        }

        let payload_len = usize::from(full) + 1;
        let mut bytes = vec![Command::Shift { channel }.encode(), tail, full];

        match mode {
            ChannelMode::DriveOnly | ChannelMode::ShiftIn => {}
            ChannelMode::ShiftOut => bytes.extend((0..payload_len).map(|i| byte_at(data, i))),
            ChannelMode::ShiftCompare => {
                let tail_mask = ((1u16 << tail) - 1) as u8;
                for i in 0..payload_len {
                    let mut m = byte_at(mask, i);
                    if i + 1 == payload_len {
                        m &= tail_mask;
                    }
                    bytes.push(byte_at(data, i));
                    bytes.push(m);
                }
            }
        }

        self.emit(&bytes)?;
        if mode == ChannelMode::ShiftIn {
            self.expected_responses += payload_len;
        }
        Ok(())
    }

    pub fn clear_status(&mut self) -> Result<(), EncodeError> {
        self.emit(&[Command::ClearStatus.encode()])
    }

    pub fn get_status(&mut self) -> Result<(), EncodeError> {
        self.reject_in_loop("Get-Status")?;
        self.emit(&[Command::GetStatus.encode()])?;
        self.expected_responses += 1;
        Ok(())
    }

    /// Open a loop body that the device repeats up to `iterations` times.
    ///
    /// The device rewinds within a single packet, so the body starts a new
    /// packet and must fit in it.
    pub fn begin_loop(&mut self, iterations: u16) -> Result<(), EncodeError> {
        if self.in_loop {
            return Err(EncodeError::NestedLoop);
        }
        self.close_packet();
        self.in_loop = true;
        let [low, high] = iterations.to_le_bytes();
        self.emit(&[Command::LoopBegin.encode(), low, high])
    }

    pub fn end_loop(&mut self) -> Result<(), EncodeError> {
        if !self.in_loop {
            return Err(EncodeError::NotInLoop);
        }
        // emit() keeps a byte free for this while a body is open
        self.current.push(LOOP_END);
        self.in_loop = false;
        self.close_packet();
        Ok(())
    }

    pub fn finish(mut self) -> Result<Batch, EncodeError> {
        if self.in_loop {
            return Err(EncodeError::UnterminatedLoop);
        }
        self.close_packet();
        Ok(Batch {
            packets: self.packets,
            expected_responses: self.expected_responses,
        })
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if self.in_loop {
            if self.current.len() + bytes.len() + 1 > HOST_PACKET_SIZE {
                return Err(EncodeError::LoopTooLarge);
            }
            self.current.extend_from_slice(bytes);
            return Ok(());
        }

        for &byte in bytes {
            if self.current.len() == HOST_PACKET_SIZE {
                self.close_packet();
            }
            self.current.push(byte);
        }
        Ok(())
    }

    fn close_packet(&mut self) {
        if !self.current.is_empty() {
            debug!(
                "packet {}: {} bytes",
                self.packets.len(),
                self.current.len()
            );
            self.packets.push(std::mem::take(&mut self.current));
        }
    }

    fn reject_in_loop(&self, op: &'static str) -> Result<(), EncodeError> {
        if self.in_loop {
            Err(EncodeError::NotAllowedInLoop(op))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use protocol::Status;
    use protocol::command::{LOOP_BEGIN, SHIFT};
    use protocol::sim::{Loopback, SimGpio};

    use super::*;
    use crate::testing::run_batch;

    fn config(mode: ChannelMode, input_mask: u8) -> ChannelConfig {
        ChannelConfig {
            mode,
            input_mask,
            ..ChannelConfig::from_bytes([0, 0, 0x00, 0x10, 0x08, 0x18, 0])
        }
    }

    #[test]
    fn bit_counts_split_like_the_wire_expects() {
        assert_eq!(split_bits(1), Some((1, 0)));
        assert_eq!(split_bits(8), Some((8, 0)));
        assert_eq!(split_bits(9), Some((1, 1)));
        assert_eq!(split_bits(16), Some((8, 1)));
        assert_eq!(split_bits(MAX_SHIFT_BITS), Some((8, 255)));
    }

    #[test]
    fn split_rejects_lengths_no_header_can_carry() {
        assert_eq!(split_bits(0), None);
        assert_eq!(split_bits(MAX_SHIFT_BITS + 1), None);
        assert_eq!(split_bits(u16::MAX), None);
    }

    #[test]
    fn shift_payload_follows_channel_mode() {
        let mut programmer = Programmer::new();
        programmer.configure_channel(0, &config(ChannelMode::DriveOnly, 0)).unwrap();
        programmer.configure_channel(1, &config(ChannelMode::ShiftOut, 0)).unwrap();
        programmer.configure_channel(3, &config(ChannelMode::ShiftIn, 4)).unwrap();
        programmer.configure_channel(4, &config(ChannelMode::ShiftCompare, 4)).unwrap();
        let prelude = programmer.current.len();

        programmer.shift(0, 20, &[0xff], &[]).unwrap();
        programmer.shift(1, 12, &[0x34, 0x12], &[]).unwrap();
        programmer.shift(3, 9, &[], &[]).unwrap();
        programmer.shift(4, 12, &[0x34, 0x12], &[0xff, 0xff]).unwrap();

        assert_eq!(
            &programmer.current[prelude..],
            &[
                SHIFT, 4, 2, //
                SHIFT | 1, 4, 1, 0x34, 0x12, //
                SHIFT | 3, 1, 1, //
                SHIFT | 4, 4, 1, 0x34, 0xff, 0x12, 0x0f,
            ]
        );
        assert_eq!(programmer.expected_responses(), 2);
    }

    #[test]
    fn rejects_bad_shifts() {
        let mut programmer = Programmer::new();
        assert_eq!(
            programmer.shift(2, 8, &[], &[]),
            Err(EncodeError::ChannelNotConfigured(2))
        );
        assert_eq!(
            programmer.shift(8, 8, &[], &[]),
            Err(EncodeError::InvalidChannel(8))
        );
        programmer.configure_channel(2, &config(ChannelMode::ShiftOut, 0)).unwrap();
        assert_eq!(
            programmer.shift(2, 0, &[], &[]),
            Err(EncodeError::InvalidBitCount(0))
        );
        assert_eq!(
            programmer.shift(2, 2049, &[], &[]),
            Err(EncodeError::InvalidBitCount(2049))
        );
    }

    #[test]
    fn packets_stop_short_of_full_size() {
        let mut programmer = Programmer::new();
        for i in 0..100 {
            programmer.set(i).unwrap();
        }
        let batch = programmer.finish().unwrap();
        let sizes: Vec<usize> = batch.packets.iter().map(Vec::len).collect();
        assert_eq!(sizes, [HOST_PACKET_SIZE, 100 - HOST_PACKET_SIZE]);
    }

    #[test]
    fn loop_gets_a_packet_of_its_own() {
        let mut programmer = Programmer::new();
        programmer.configure_channel(4, &config(ChannelMode::ShiftCompare, 4)).unwrap();
        programmer.begin_loop(300).unwrap();
        programmer.shift(4, 1, &[1], &[1]).unwrap();
        programmer.end_loop().unwrap();
        programmer.clear_status().unwrap();
        let batch = programmer.finish().unwrap();

        assert_eq!(batch.packets.len(), 3);
        assert_eq!(
            batch.packets[1],
            [LOOP_BEGIN, 44, 1, SHIFT | 4, 1, 0, 1, 1, LOOP_END]
        );
        assert_eq!(batch.expected_responses, 0);
    }

    #[test]
    fn loop_body_must_fit_one_packet() {
        let mut programmer = Programmer::new();
        programmer.configure_channel(1, &config(ChannelMode::ShiftOut, 0)).unwrap();
        programmer.begin_loop(2).unwrap();
        // 3 header + 8 bytes per shift
        for _ in 0..7 {
            programmer.shift(1, 40, &[0; 5], &[]).unwrap();
        }
        assert_eq!(
            programmer.shift(1, 40, &[0; 5], &[]),
            Err(EncodeError::LoopTooLarge)
        );
        programmer.end_loop().unwrap();
        let batch = programmer.finish().unwrap();
        assert!(batch.packets.iter().all(|p| p.len() <= HOST_PACKET_SIZE));
    }

    #[test]
    fn loop_structure_is_checked() {
        let mut programmer = Programmer::new();
        assert_eq!(programmer.end_loop(), Err(EncodeError::NotInLoop));
        programmer.begin_loop(1).unwrap();
        assert_eq!(programmer.begin_loop(1), Err(EncodeError::NestedLoop));
        assert_eq!(
            programmer.get_status(),
            Err(EncodeError::NotAllowedInLoop("Get-Status"))
        );
        assert_eq!(
            programmer.set_get(0),
            Err(EncodeError::NotAllowedInLoop("Set-Get"))
        );
        assert_eq!(
            programmer.configure_io(0),
            Err(EncodeError::NotAllowedInLoop("Configure-IO"))
        );
        assert_eq!(programmer.finish(), Err(EncodeError::UnterminatedLoop));
    }

    #[test]
    fn set_get_reads_back_inputs_through_the_engine() {
        let mut programmer = Programmer::new();
        programmer.configure_io(0b000_111).unwrap();
        programmer.set_get(0b110_000).unwrap();
        programmer.get_status().unwrap();
        let batch = programmer.finish().unwrap();

        let mut gpio = SimGpio::new();
        gpio.set_default_input(0b101_101);
        let device = run_batch(&batch, gpio);

        assert_eq!(device.transport().sent_bytes(), [0b000_101, 0]);
        assert_eq!(device.port().latch(), 0b110_000);
        assert_eq!(batch.expected_responses, 2);
    }

    #[test]
    fn long_shift_round_trips_through_loopback() {
        let payload: Vec<u8> = (0..200u8).map(|i| i.wrapping_mul(37)).collect();
        let num_bits = (payload.len() * 8 - 3) as u16;

        let mut programmer = Programmer::new();
        programmer.configure_io(0b000_111).unwrap();
        programmer
            .configure_channel(1, &ChannelConfig::from_bytes([0x1, 0, 0x00, 0x10, 0x08, 0x18, 0]))
            .unwrap();
        programmer
            .configure_channel(3, &ChannelConfig::from_bytes([0x4, 0x04, 0x20, 0x30, 0x20, 0x30, 0]))
            .unwrap();
        programmer.shift(1, num_bits, &payload, &[]).unwrap();
        programmer.shift(3, num_bits, &[], &[]).unwrap();
        let batch = programmer.finish().unwrap();
        assert!(batch.packets.len() > 3);

        let mut gpio = SimGpio::new();
        gpio.attach_loopback(Loopback::new(0x10, 0x08, 0x04, 0x20));
        let device = run_batch(&batch, gpio);

        let mut expected = payload.clone();
        if let Some(last) = expected.last_mut() {
            *last &= 0x1f;
        }
        assert_eq!(device.transport().sent_bytes(), expected);
        assert_eq!(batch.expected_responses, payload.len());
    }

    #[test]
    fn failed_poll_loop_reports_once() {
        let mut programmer = Programmer::new();
        programmer.configure_io(0b000_111).unwrap();
        programmer
            .configure_channel(4, &ChannelConfig::from_bytes([0xc, 0x04, 0x00, 0x10, 0, 0x10, 0]))
            .unwrap();
        programmer.clear_status().unwrap();
        programmer.begin_loop(4).unwrap();
        programmer.shift(4, 1, &[1], &[1]).unwrap();
        programmer.end_loop().unwrap();
        programmer.get_status().unwrap();
        let batch = programmer.finish().unwrap();

        let device = run_batch(&batch, SimGpio::new());
        assert_eq!(device.transport().sent_bytes(), [1, 1]);
        assert_eq!(device.status(), Status::Fail);
    }
}
