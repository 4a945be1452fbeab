//! Flash programming for Lattice MachXO2 parts over JTAG.
//!
//! [`program`] encodes the whole erase, write, verify and feature-row sequence
//! up front. Busy waits become device-side poll loops, so nothing in the
//! stream depends on a host round trip. Progress comes back as Get-Status
//! bytes at [`Checkpoint`]s; [`ProgressTracker`] matches them up.

use core::fmt;

use log::debug;
use protocol::Status;

use crate::error::{EncodeError, ProgramError};
use crate::jedec::{FuseRow, JedecFile, ROW_BITS};
use crate::jtag::{Jtag, TapState};
use crate::programmer::{Batch, Programmer};
use crate::response::decode_status;

const SAMPLE_PRELOAD: u8 = 0x1c;
const LSC_READ_STATUS: u8 = 0x3c;
const ISC_ENABLE: u8 = 0xc6;
const ISC_ERASE: u8 = 0x0e;
const ISC_DISABLE: u8 = 0x26;
const ISC_PROGRAM_DONE: u8 = 0x5e;
const BYPASS: u8 = 0xff;
const LSC_CHECK_BUSY: u8 = 0xf0;
const LSC_INIT_ADDRESS: u8 = 0x46;
const LSC_INIT_ADDR_UFM: u8 = 0x47;
const LSC_PROG_INCR_NV: u8 = 0x70;
const LSC_READ_INCR_NV: u8 = 0x73;
const LSC_PROG_FEATURE: u8 = 0xe4;
const LSC_READ_FEATURE: u8 = 0xe7;
const LSC_PROG_FEABITS: u8 = 0xf8;
const LSC_READ_FEABITS: u8 = 0xfb;

const IR_BITS: u16 = 8;
const BOUNDARY_BITS: u16 = 208;
const BUSY_POLLS: u16 = 10_000;

/// Rows written or verified between two progress reports.
pub const ROWS_PER_CHECKPOINT: usize = 20;

/// Status register bits that must read back clear at each step.
const KEY_PROTECT: u32 = 0x0001_0000;
const OTP_FUSES: u32 = 0x0002_4040;
const BUSY_OR_FAIL: u32 = 0x0000_3000;
const DONE: u32 = 0x0000_0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Erase,
    Write,
    Verify,
    Features,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Prepare => "checking security fuses",
            Stage::Erase => "erasing configuration flash",
            Stage::Write => "writing bitstream",
            Stage::Verify => "verifying bitstream",
            Stage::Features => "writing feature rows",
            Stage::Done => "setting the done bit",
        })
    }
}

/// A Get-Status request in the stream, answered once the device got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub stage: Stage,
    /// Rows written or verified since the previous checkpoint.
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPlan {
    pub batch: Batch,
    pub checkpoints: Vec<Checkpoint>,
}

impl ProgramPlan {
    /// Progress units: every row once for writing and once for verifying.
    pub fn total_rows(&self) -> usize {
        self.checkpoints.iter().map(|c| c.rows).sum()
    }
}

/// Encode a full program-and-verify run for `jed`.
pub fn program(jed: &JedecFile) -> Result<ProgramPlan, EncodeError> {
    let mut flow = Flow {
        jtag: Jtag::new(Programmer::new())?,
        checkpoints: Vec::new(),
        pending_rows: 0,
    };
    flow.jtag.programmer().clear_status()?;

    flow.write_ir(SAMPLE_PRELOAD)?;
    flow.write_dr(BOUNDARY_BITS, &[0xff; BOUNDARY_BITS as usize / 8])?;

    flow.read_status(1000, 0, KEY_PROTECT)?;

    flow.write_ir(ISC_ENABLE)?;
    flow.write_dr(8, &[0x00])?;
    flow.jtag.run_test(1000)?;
    flow.write_ir(ISC_ERASE)?;
    flow.write_dr(8, &[0x01])?;
    flow.jtag.run_test(1000)?;
    flow.write_ir(BYPASS)?;
    flow.write_ir(ISC_ENABLE)?;
    flow.write_dr(8, &[0x08])?;
    flow.jtag.run_test(1000)?;

    flow.read_status(1000, 0, OTP_FUSES)?;
    flow.checkpoint(Stage::Prepare, 0)?;

    flow.write_ir(ISC_ERASE)?;
    flow.write_dr(8, &[0x0e])?;
    flow.jtag.run_test(1000)?;
    flow.wait_until_idle(1000)?;
    flow.checkpoint(Stage::Erase, 0)?;

    flow.read_status(1000, 0, BUSY_OR_FAIL)?;

    let config: Vec<&FuseRow> = jed.cfg_data.iter().chain(&jed.ebr_data).collect();

    flow.init_address(LSC_INIT_ADDRESS)?;
    for row in &config {
        flow.write_row(row)?;
    }
    if !jed.ufm_data.is_empty() {
        flow.init_address(LSC_INIT_ADDR_UFM)?;
        for row in &jed.ufm_data {
            flow.write_row(row)?;
        }
    }
    flow.flush_rows(Stage::Write)?;

    flow.init_address(LSC_INIT_ADDRESS)?;
    flow.write_ir(LSC_READ_INCR_NV)?;
    for row in &config {
        flow.verify_row(row)?;
    }
    if !jed.ufm_data.is_empty() {
        flow.init_address(LSC_INIT_ADDR_UFM)?;
        flow.write_ir(LSC_READ_INCR_NV)?;
        for row in &jed.ufm_data {
            flow.verify_row(row)?;
        }
    }
    flow.flush_rows(Stage::Verify)?;

    let feature_row = jed.feature_row.to_le_bytes();
    let feature_bits = jed.feature_bits.to_le_bytes();

    flow.write_ir(LSC_INIT_ADDRESS)?;
    flow.write_dr(8, &[0x02])?;
    flow.jtag.run_test(2)?;
    flow.write_ir(LSC_PROG_FEATURE)?;
    flow.write_dr(64, &feature_row)?;
    flow.jtag.run_test(2)?;
    flow.wait_until_idle(100)?;
    flow.write_ir(LSC_READ_FEATURE)?;
    flow.jtag.run_test(2)?;
    flow.check_dr(64, &feature_row, &[0xff; 8])?;

    flow.write_ir(LSC_PROG_FEABITS)?;
    flow.write_dr(16, &feature_bits)?;
    flow.jtag.run_test(2)?;
    flow.wait_until_idle(100)?;
    flow.write_ir(LSC_READ_FEABITS)?;
    flow.jtag.run_test(2)?;
    flow.check_dr(16, &feature_bits, &[0xff; 2])?;

    flow.read_status(2, 0, BUSY_OR_FAIL)?;
    flow.checkpoint(Stage::Features, 0)?;

    flow.write_ir(ISC_PROGRAM_DONE)?;
    flow.jtag.run_test(2)?;
    flow.write_dr(8, &[0xf0])?;
    flow.wait_until_idle(100)?;
    flow.write_ir(BYPASS)?;

    flow.write_ir(ISC_DISABLE)?;
    flow.jtag.run_test(1000)?;
    flow.write_ir(BYPASS)?;
    flow.jtag.run_test(1000)?;
    flow.jtag.run_test(10_000)?;

    flow.write_ir(LSC_READ_STATUS)?;
    flow.check_dr(32, &DONE.to_le_bytes(), &(DONE | 0x2000).to_le_bytes())?;
    flow.jtag.reset()?;
    flow.checkpoint(Stage::Done, 0)?;

    flow.finish()
}

struct Flow {
    jtag: Jtag,
    checkpoints: Vec<Checkpoint>,
    pending_rows: usize,
}

impl Flow {
    fn write_ir(&mut self, instruction: u8) -> Result<(), EncodeError> {
        self.jtag.shift_ir(IR_BITS, &[instruction])?;
        self.jtag.goto(TapState::PauseIr)
    }

    fn write_dr(&mut self, num_bits: u16, data: &[u8]) -> Result<(), EncodeError> {
        self.jtag.shift_dr(num_bits, data)?;
        self.jtag.goto(TapState::PauseDr)
    }

    fn check_dr(&mut self, num_bits: u16, expected: &[u8], mask: &[u8]) -> Result<(), EncodeError> {
        self.jtag.check_dr(num_bits, expected, mask)?;
        self.jtag.goto(TapState::PauseDr)
    }

    /// Read the 32-bit status register and require `expected` under `mask`.
    fn read_status(&mut self, settle: u32, expected: u32, mask: u32) -> Result<(), EncodeError> {
        self.write_ir(LSC_READ_STATUS)?;
        self.jtag.run_test(settle)?;
        self.check_dr(32, &expected.to_le_bytes(), &mask.to_le_bytes())
    }

    fn wait_until_idle(&mut self, idle_clocks: u16) -> Result<(), EncodeError> {
        self.write_ir(LSC_CHECK_BUSY)?;
        self.jtag.poll_dr(1, &[0], &[1], BUSY_POLLS, idle_clocks)
    }

    fn init_address(&mut self, instruction: u8) -> Result<(), EncodeError> {
        self.write_ir(instruction)?;
        if instruction == LSC_INIT_ADDRESS {
            self.write_dr(8, &[0x04])?;
        }
        self.jtag.run_test(1000)
    }

    fn write_row(&mut self, row: &FuseRow) -> Result<(), EncodeError> {
        self.write_ir(LSC_PROG_INCR_NV)?;
        self.write_dr(ROW_BITS as u16, row)?;
        self.jtag.run_test(2)?;
        self.wait_until_idle(100)?;
        self.row_done(Stage::Write)
    }

    fn verify_row(&mut self, row: &FuseRow) -> Result<(), EncodeError> {
        self.jtag.run_test(2)?;
        self.check_dr(ROW_BITS as u16, row, &[0xff; ROW_BITS / 8])?;
        self.row_done(Stage::Verify)
    }

    fn row_done(&mut self, stage: Stage) -> Result<(), EncodeError> {
        self.pending_rows += 1;
        if self.pending_rows == ROWS_PER_CHECKPOINT {
            self.flush_rows(stage)?;
        }
        Ok(())
    }

    fn flush_rows(&mut self, stage: Stage) -> Result<(), EncodeError> {
        if self.pending_rows > 0 {
            self.checkpoint(stage, self.pending_rows)?;
        }
        Ok(())
    }

    fn checkpoint(&mut self, stage: Stage, rows: usize) -> Result<(), EncodeError> {
        self.jtag.programmer().get_status()?;
        self.checkpoints.push(Checkpoint { stage, rows });
        self.pending_rows = 0;
        Ok(())
    }

    fn finish(self) -> Result<ProgramPlan, EncodeError> {
        let batch = self.jtag.finish()?;
        debug!(
            "machxo2 plan: {} packets, {} checkpoints",
            batch.packets.len(),
            self.checkpoints.len()
        );
        Ok(ProgramPlan {
            batch,
            checkpoints: self.checkpoints,
        })
    }
}

/// Matches status bytes coming back from the device to the plan's
/// checkpoints, in order.
pub struct ProgressTracker<'a> {
    checkpoints: &'a [Checkpoint],
    reached: usize,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(plan: &'a ProgramPlan) -> Self {
        Self {
            checkpoints: &plan.checkpoints,
            reached: 0,
        }
    }

    /// Account for one response byte.
    ///
    /// A Fail byte, solicited or not, ends the run at the stage it arrived in.
    pub fn feed(&mut self, byte: u8) -> Result<Checkpoint, ProgramError> {
        let checkpoint = *self
            .checkpoints
            .get(self.reached)
            .ok_or(ProgramError::UnexpectedResponse(byte))?;
        match decode_status(byte)? {
            Status::Success => {
                self.reached += 1;
                Ok(checkpoint)
            }
            Status::Fail => Err(ProgramError::Failed(checkpoint.stage)),
        }
    }

    pub fn is_done(&self) -> bool {
        self.reached == self.checkpoints.len()
    }

    /// Stage the next status byte will report on.
    pub fn next_stage(&self) -> Option<Stage> {
        self.checkpoints.get(self.reached).map(|c| c.stage)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use protocol::Device;
    use protocol::sim::{GpioOp, SimGpio, SimTransport};

    use super::*;
    use crate::jedec::tests::sample;
    use crate::jtag::TDO;
    use crate::testing::run_batch;

    fn plan() -> ProgramPlan {
        program(&JedecFile::parse(&sample()).unwrap()).unwrap()
    }

    /// Same shape as the sample, with every fuse cleared.
    fn blank_file() -> JedecFile {
        let mut jed = JedecFile::parse(&sample()).unwrap();
        for row in jed
            .cfg_data
            .iter_mut()
            .chain(&mut jed.ebr_data)
            .chain(&mut jed.ufm_data)
        {
            *row = [0; 16];
        }
        jed.feature_row = 0;
        jed.feature_bits = 0;
        jed
    }

    fn input_reads(device: &Device<SimTransport, SimGpio>) -> usize {
        device
            .gpio()
            .ops()
            .iter()
            .filter(|op| matches!(op, GpioOp::Input(_)))
            .count()
    }

    fn track(plan: &ProgramPlan, responses: &[u8]) -> Result<usize, ProgramError> {
        let mut tracker = ProgressTracker::new(plan);
        let mut rows = 0;
        for &byte in responses {
            rows += tracker.feed(byte)?.rows;
        }
        assert!(tracker.is_done());
        Ok(rows)
    }

    #[test]
    fn checkpoints_cover_every_row_twice() {
        let plan = plan();
        // three config + EBR rows and one UFM row, written then verified
        assert_eq!(plan.total_rows(), 2 * 4);
        assert_eq!(plan.batch.expected_responses, plan.checkpoints.len());
        let stages: Vec<Stage> = plan.checkpoints.iter().map(|c| c.stage).collect();
        assert_eq!(
            stages,
            [
                Stage::Prepare,
                Stage::Erase,
                Stage::Write,
                Stage::Verify,
                Stage::Features,
                Stage::Done
            ]
        );
    }

    #[test]
    fn long_files_report_every_twenty_rows() {
        let mut jed = JedecFile::parse(&sample()).unwrap();
        jed.cfg_data = vec![[0; 16]; 45];
        jed.ebr_data.clear();
        jed.ufm_data.clear();
        let plan = program(&jed).unwrap();

        let writes: Vec<usize> = plan
            .checkpoints
            .iter()
            .filter(|c| c.stage == Stage::Write)
            .map(|c| c.rows)
            .collect();
        assert_eq!(writes, [20, 20, 5]);
        assert_eq!(plan.total_rows(), 90);
    }

    #[test]
    fn blank_device_without_done_bit_fails_at_the_end() {
        let plan = program(&blank_file()).unwrap();
        let device = run_batch(&plan.batch, SimGpio::new());

        // every compare up to the final status read matches a device reading
        // all zeros, so only the solicited bytes come back
        let responses = device.transport().sent_bytes();
        assert_eq!(responses.len(), plan.checkpoints.len());
        assert_eq!(track(&plan, &responses), Err(ProgramError::Failed(Stage::Done)));
        // each row is read back through the TDO channel
        assert!(input_reads(&device) > 4 * ROW_BITS);
    }

    #[test]
    fn programmed_device_reports_done() {
        let plan = program(&blank_file()).unwrap();

        // count the samples taken before the final status read
        let blank = run_batch(&plan.batch, SimGpio::new());
        let before_done = input_reads(&blank) - 32;

        let mut gpio = SimGpio::new();
        for _ in 0..before_done + 8 {
            gpio.push_input(0);
        }
        gpio.push_input(TDO);
        let device = run_batch(&plan.batch, gpio);

        let responses = device.transport().sent_bytes();
        assert_eq!(responses, vec![0; plan.checkpoints.len()]);
        assert_eq!(track(&plan, &responses), Ok(plan.total_rows()));
        assert!(!device.engine().loop_active());
    }

    #[test]
    fn locked_device_fails_before_erase() {
        let plan = plan();
        let mut gpio = SimGpio::new();
        // key protection is bit 16 of the first status read
        for _ in 0..16 {
            gpio.push_input(0);
        }
        gpio.push_input(TDO);
        let device = run_batch(&plan.batch, gpio);

        let responses = device.transport().sent_bytes();
        // the unsolicited Fail, then the latched status at every checkpoint
        assert_eq!(responses.len(), plan.checkpoints.len() + 1);
        assert!(responses.iter().all(|&byte| byte == 1));
        assert_eq!(
            track(&plan, &responses),
            Err(ProgramError::Failed(Stage::Prepare))
        );
    }

    #[test]
    fn busy_waits_poll_on_the_device() {
        let plan = program(&blank_file()).unwrap();
        let quiet = run_batch(&plan.batch, SimGpio::new());

        // flash reports busy twice during the erase wait
        // the key and OTP status reads come first
        let mut gpio = SimGpio::new();
        for _ in 0..2 * 32 {
            gpio.push_input(0);
        }
        gpio.push_input(TDO);
        gpio.push_input(TDO);
        let device = run_batch(&plan.batch, gpio);

        assert_eq!(input_reads(&device), input_reads(&quiet) + 2);
        assert_eq!(
            &device.transport().sent_bytes()[..2],
            [0, 0],
            "erase still completes"
        );
    }

    #[test]
    fn tracker_rejects_bytes_past_the_plan() {
        let plan = plan();
        let mut tracker = ProgressTracker::new(&plan);
        assert_eq!(tracker.next_stage(), Some(Stage::Prepare));
        for _ in 0..plan.checkpoints.len() {
            tracker.feed(0).unwrap();
        }
        assert!(tracker.is_done());
        assert_eq!(tracker.next_stage(), None);
        assert_eq!(tracker.feed(0), Err(ProgramError::UnexpectedResponse(0)));
        assert_eq!(
            ProgressTracker::new(&plan).feed(7),
            Err(ProgramError::Decode(crate::DecodeError::InvalidStatus(7)))
        );
    }
}
