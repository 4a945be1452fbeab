//! JTAG on top of the shift channels.
//!
//! Pins: TMS on bit 5, TCK on bit 4, TDI on bit 3 and TDO on bit 2. Five
//! channels are set up once by [`Jtag::new`]; every TAP movement after that is
//! a shift on the TMS channel, and data shifts leave the TAP in Exit1 because
//! the TDI/TDO channels raise TMS on their last bit.

use std::collections::VecDeque;

use protocol::{ChannelConfig, ChannelMode};

use crate::error::EncodeError;
use crate::programmer::{Batch, MAX_SHIFT_BITS, Programmer};

pub const TMS: u8 = 1 << 5;
pub const TCK: u8 = 1 << 4;
pub const TDI: u8 = 1 << 3;
pub const TDO: u8 = 1 << 2;

/// TDO and the two unused low pins are inputs.
pub const DIRECTIONS: u8 = 0b000_111;

pub const RUN_TCK: u8 = 0;
pub const SHIFT_TMS: u8 = 1;
pub const SHIFT_TDI: u8 = 2;
pub const SHIFT_TDO: u8 = 3;
pub const POLL_TDO: u8 = 4;

/// IEEE 1149.1 TAP controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    pub const ALL: [TapState; 16] = [
        TapState::TestLogicReset,
        TapState::RunTestIdle,
        TapState::SelectDrScan,
        TapState::CaptureDr,
        TapState::ShiftDr,
        TapState::Exit1Dr,
        TapState::PauseDr,
        TapState::Exit2Dr,
        TapState::UpdateDr,
        TapState::SelectIrScan,
        TapState::CaptureIr,
        TapState::ShiftIr,
        TapState::Exit1Ir,
        TapState::PauseIr,
        TapState::Exit2Ir,
        TapState::UpdateIr,
    ];

    /// State after one TCK rising edge with the given TMS level.
    pub const fn next(self, tms: bool) -> Self {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, false) => RunTestIdle,
            (TestLogicReset, true) => TestLogicReset,
            (RunTestIdle, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDrScan,

            (SelectDrScan, false) => CaptureDr,
            (SelectDrScan, true) => SelectIrScan,
            (CaptureDr, false) | (ShiftDr, false) | (Exit2Dr, false) => ShiftDr,
            (CaptureDr, true) | (ShiftDr, true) => Exit1Dr,
            (Exit1Dr, false) | (PauseDr, false) => PauseDr,
            (Exit1Dr, true) | (Exit2Dr, true) => UpdateDr,
            (PauseDr, true) => Exit2Dr,

            (SelectIrScan, false) => CaptureIr,
            (SelectIrScan, true) => TestLogicReset,
            (CaptureIr, false) | (ShiftIr, false) | (Exit2Ir, false) => ShiftIr,
            (CaptureIr, true) | (ShiftIr, true) => Exit1Ir,
            (Exit1Ir, false) | (PauseIr, false) => PauseIr,
            (Exit1Ir, true) | (Exit2Ir, true) => UpdateIr,
            (PauseIr, true) => Exit2Ir,

            (UpdateDr, false) | (UpdateIr, false) => RunTestIdle,
            (UpdateDr, true) | (UpdateIr, true) => SelectDrScan,
        }
    }

    /// Shortest TMS sequence from `self` to `target`.
    pub fn path(self, target: TapState) -> Vec<bool> {
        let mut prev: [Option<(TapState, bool)>; 16] = [None; 16];
        let mut seen = [false; 16];
        let mut queue = VecDeque::from([self]);
        seen[self as usize] = true;

        while let Some(state) = queue.pop_front() {
            if state == target {
                break;
            }
            for tms in [false, true] {
                let next = state.next(tms);
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    prev[next as usize] = Some((state, tms));
                    queue.push_back(next);
                }
            }
        }

        let mut tms = Vec::new();
        let mut state = target;
        while state != self {
            let Some((from, bit)) = prev[state as usize] else {
                break;
            };
            tms.push(bit);
            state = from;
        }
        tms.reverse();
        tms
    }
}

/// The five channel set-ups JTAG runs on, by channel id.
pub fn presets() -> [(u8, ChannelConfig); 5] {
    let base = ChannelConfig::from_bytes([0, 0, 0, TCK, 0, TCK, 0]);
    [
        (RUN_TCK, base),
        (
            SHIFT_TMS,
            ChannelConfig::from_bytes([
                ChannelMode::ShiftOut.flags(),
                0,
                0,
                TCK,
                TMS,
                TMS | TCK,
                0,
            ]),
        ),
        (
            SHIFT_TDI,
            ChannelConfig::from_bytes([
                ChannelMode::ShiftOut.flags(),
                0,
                0,
                TCK,
                TDI,
                TDI | TCK,
                TMS,
            ]),
        ),
        (
            SHIFT_TDO,
            ChannelConfig {
                mode: ChannelMode::ShiftIn,
                input_mask: TDO,
                last_overlay: TMS,
                ..base
            },
        ),
        (
            POLL_TDO,
            ChannelConfig {
                mode: ChannelMode::ShiftCompare,
                input_mask: TDO,
                last_overlay: TMS,
                ..base
            },
        ),
    ]
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

/// Tracks the TAP state while encoding JTAG operations.
pub struct Jtag {
    programmer: Programmer,
    state: TapState,
}

impl Jtag {
    /// Configure the pins and channels, then force the TAP into reset.
    pub fn new(mut programmer: Programmer) -> Result<Self, EncodeError> {
        programmer.configure_io(DIRECTIONS)?;
        for (id, config) in presets() {
            programmer.configure_channel(id, &config)?;
        }

        let mut jtag = Self {
            programmer,
            state: TapState::TestLogicReset,
        };
        jtag.reset()?;
        Ok(jtag)
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// For raw commands between JTAG operations. TAP tracking assumes they
    /// do not clock the TAP.
    pub fn programmer(&mut self) -> &mut Programmer {
        &mut self.programmer
    }

    /// Five TMS-high clocks reach Test-Logic-Reset from any state.
    pub fn reset(&mut self) -> Result<(), EncodeError> {
        self.clock_tms(&[true; 5])?;
        self.state = TapState::TestLogicReset;
        Ok(())
    }

    pub fn goto(&mut self, target: TapState) -> Result<(), EncodeError> {
        let path = self.state.path(target);
        if !path.is_empty() {
            self.clock_tms(&path)?;
        }
        self.state = target;
        Ok(())
    }

    /// Clock TCK `clocks` times in Run-Test/Idle.
    pub fn run_test(&mut self, clocks: u32) -> Result<(), EncodeError> {
        self.goto(TapState::RunTestIdle)?;
        let mut left = clocks;
        while left > 0 {
            let now = left.min(u32::from(MAX_SHIFT_BITS));
            self.programmer.shift(RUN_TCK, now as u16, &[], &[])?;
            left -= now;
        }
        Ok(())
    }

    pub fn shift_ir(&mut self, num_bits: u16, data: &[u8]) -> Result<(), EncodeError> {
        self.goto(TapState::ShiftIr)?;
        self.programmer.shift(SHIFT_TDI, num_bits, data, &[])?;
        self.state = TapState::Exit1Ir;
        Ok(())
    }

    pub fn shift_dr(&mut self, num_bits: u16, data: &[u8]) -> Result<(), EncodeError> {
        self.goto(TapState::ShiftDr)?;
        self.programmer.shift(SHIFT_TDI, num_bits, data, &[])?;
        self.state = TapState::Exit1Dr;
        Ok(())
    }

    /// Capture `num_bits` of the data register; the device answers with
    /// `ceil(num_bits / 8)` bytes.
    pub fn read_dr(&mut self, num_bits: u16) -> Result<(), EncodeError> {
        self.goto(TapState::ShiftDr)?;
        self.programmer.shift(SHIFT_TDO, num_bits, &[], &[])?;
        self.state = TapState::Exit1Dr;
        Ok(())
    }

    /// Compare `num_bits` of the data register against `expected` under
    /// `mask`. A mismatch latches Fail on the device.
    pub fn check_dr(
        &mut self,
        num_bits: u16,
        expected: &[u8],
        mask: &[u8],
    ) -> Result<(), EncodeError> {
        self.goto(TapState::ShiftDr)?;
        self.programmer.shift(POLL_TDO, num_bits, expected, mask)?;
        self.state = TapState::Exit1Dr;
        Ok(())
    }

    /// Re-read the data register on the device until the masked bits equal
    /// `expected`, at most `iterations` times.
    ///
    /// Each pass starts and ends in Run-Test/Idle and first spends
    /// `idle_clocks` TCK cycles there. The device reports a single Fail byte
    /// if no pass matched.
    pub fn poll_dr(
        &mut self,
        num_bits: u16,
        expected: &[u8],
        mask: &[u8],
        iterations: u16,
        idle_clocks: u16,
    ) -> Result<(), EncodeError> {
        self.goto(TapState::RunTestIdle)?;
        self.programmer.begin_loop(iterations)?;
        if idle_clocks > 0 {
            self.programmer.shift(RUN_TCK, idle_clocks, &[], &[])?;
        }
        self.clock_tms(&TapState::RunTestIdle.path(TapState::ShiftDr))?;
        self.programmer.shift(POLL_TDO, num_bits, expected, mask)?;
        self.clock_tms(&TapState::Exit1Dr.path(TapState::RunTestIdle))?;
        self.programmer.end_loop()?;
        self.state = TapState::RunTestIdle;
        Ok(())
    }

    pub fn finish(self) -> Result<Batch, EncodeError> {
        self.programmer.finish()
    }

    fn clock_tms(&mut self, tms: &[bool]) -> Result<(), EncodeError> {
        self.programmer
            .shift(SHIFT_TMS, tms.len() as u16, &pack_bits(tms), &[])
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use protocol::sim::{GpioOp, SimGpio};

    use super::*;
    use crate::response::bits_from_bytes;
    use crate::testing::run_batch;

    /// Walk the TAP through every rising TCK edge the device produced.
    /// Returns the final state and how many edges happened in each state.
    fn replay(ops: &[GpioOp]) -> (TapState, [usize; 16]) {
        let mut state = TapState::TestLogicReset;
        let mut edges = [0; 16];
        let mut latch = 0;
        for op in ops {
            if let GpioOp::Output(value) = *op {
                if !latch & value & TCK != 0 {
                    edges[state as usize] += 1;
                    state = state.next(value & TMS != 0);
                }
                latch = value;
            }
        }
        (state, edges)
    }

    #[test]
    fn path_reaches_every_state() {
        for from in TapState::ALL {
            assert!(from.path(from).is_empty());
            for to in TapState::ALL {
                let path = from.path(to);
                let end = path.iter().fold(from, |state, tms| state.next(*tms));
                assert_eq!(end, to, "{from:?} -> {to:?}");
                assert!(path.len() < TapState::ALL.len());
            }
        }
    }

    #[test]
    fn known_paths() {
        assert_eq!(TapState::ShiftDr.path(TapState::TestLogicReset), [true; 5]);
        assert_eq!(
            TapState::RunTestIdle.path(TapState::ShiftIr),
            [true, true, false, false]
        );
        assert_eq!(
            TapState::Exit1Dr.path(TapState::RunTestIdle),
            [true, false]
        );
    }

    #[test]
    fn presets_match_pin_map() {
        let presets = presets();
        assert_eq!(presets[0].1.to_bytes(), [0x0, 0, 0x00, 0x10, 0x00, 0x10, 0]);
        assert_eq!(presets[1].1.to_bytes(), [0x1, 0, 0x00, 0x10, 0x20, 0x30, 0]);
        assert_eq!(presets[2].1.to_bytes(), [0x1, 0, 0x00, 0x10, 0x08, 0x18, 0x20]);
        assert_eq!(presets[3].1.to_bytes(), [0x4, 0x04, 0x00, 0x10, 0x00, 0x10, 0x20]);
        assert_eq!(presets[4].1.to_bytes(), [0xc, 0x04, 0x00, 0x10, 0x00, 0x10, 0x20]);
    }

    #[test]
    fn idcode_read_walks_the_tap() {
        let idcode: u32 = 0x4ba0_0477;
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.read_dr(32).unwrap();
        assert_eq!(jtag.state(), TapState::Exit1Dr);
        jtag.goto(TapState::RunTestIdle).unwrap();
        let batch = jtag.finish().unwrap();
        assert_eq!(batch.expected_responses, 4);

        let mut gpio = SimGpio::new();
        for bit in 0..32 {
            gpio.push_input(if idcode >> bit & 1 != 0 { TDO } else { 0 });
        }
        let device = run_batch(&batch, gpio);

        let response = device.transport().sent_bytes();
        assert_eq!(bits_from_bytes(&response, 32), Ok(u64::from(idcode)));

        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::RunTestIdle);
        assert_eq!(edges[TapState::ShiftDr as usize], 32);
    }

    #[test]
    fn ir_shift_ends_in_exit1() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.shift_ir(10, &[0xff, 0x03]).unwrap();
        assert_eq!(jtag.state(), TapState::Exit1Ir);
        let batch = jtag.finish().unwrap();

        let device = run_batch(&batch, SimGpio::new());
        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::Exit1Ir);
        assert_eq!(edges[TapState::ShiftIr as usize], 10);
    }

    #[test]
    fn run_test_is_split_into_shift_sized_chunks() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.run_test(5000).unwrap();
        let batch = jtag.finish().unwrap();

        let device = run_batch(&batch, SimGpio::new());
        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::RunTestIdle);
        assert_eq!(edges[TapState::RunTestIdle as usize], 5000);
    }

    #[test]
    fn poll_dr_retries_on_the_device() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.poll_dr(1, &[1], &[1], 5, 0).unwrap();
        assert_eq!(jtag.state(), TapState::RunTestIdle);
        jtag.programmer().get_status().unwrap();
        let batch = jtag.finish().unwrap();

        let mut gpio = SimGpio::new();
        gpio.push_input(0);
        gpio.push_input(TDO);
        let device = run_batch(&batch, gpio);

        assert_eq!(device.transport().sent_bytes(), [0]);
        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::RunTestIdle);
        // one compare bit per pass, two passes
        assert_eq!(edges[TapState::ShiftDr as usize], 2);
    }

    #[test]
    fn exhausted_poll_reports_fail() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.poll_dr(8, &[0xa5], &[0xff], 3, 10).unwrap();
        let batch = jtag.finish().unwrap();

        let device = run_batch(&batch, SimGpio::new());
        assert_eq!(device.transport().sent_bytes(), [1]);
        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::RunTestIdle);
        assert_eq!(edges[TapState::ShiftDr as usize], 3 * 8);
        // ten idle clocks per pass, on top of the ones that walk the TAP
        assert!(edges[TapState::RunTestIdle as usize] >= 3 * 10);
    }

    #[test]
    fn check_dr_latches_a_mismatch_once() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.check_dr(4, &[0b1010], &[0b1111]).unwrap();
        assert_eq!(jtag.state(), TapState::Exit1Dr);
        jtag.check_dr(4, &[0b1010], &[0b1111]).unwrap();
        jtag.goto(TapState::RunTestIdle).unwrap();
        jtag.programmer().get_status().unwrap();
        let batch = jtag.finish().unwrap();
        assert_eq!(batch.expected_responses, 1);

        let device = run_batch(&batch, SimGpio::new());
        // one unsolicited Fail, then the status byte
        assert_eq!(device.transport().sent_bytes(), [1, 1]);
        let (state, edges) = replay(device.gpio().ops());
        assert_eq!(state, TapState::RunTestIdle);
        assert_eq!(edges[TapState::ShiftDr as usize], 2 * 4);
    }

    #[test]
    fn check_dr_match_leaves_status_clear() {
        let mut jtag = Jtag::new(Programmer::new()).unwrap();
        jtag.check_dr(4, &[0b0101], &[0b0111]).unwrap();
        jtag.programmer().get_status().unwrap();
        let batch = jtag.finish().unwrap();

        let mut gpio = SimGpio::new();
        for level in [TDO, 0, TDO, TDO] {
            gpio.push_input(level);
        }
        let device = run_batch(&batch, gpio);
        assert_eq!(device.transport().sent_bytes(), [0]);
    }
}
