//! The command engine.
//!
//! [`Engine::advance`] decodes one command and runs it until it either
//! completes or reaches a wait-point (no input byte yet, no room for a response
//! byte). Everything a suspended command needs to resume lives in [`State`],
//! never on the call stack, so the caller can return to its poll loop at any
//! wait-point and call `advance` again later.

use log::{debug, trace, warn};

use crate::channel::{ChannelConfig, ChannelMode, Phases};
use crate::command::{CHANNEL_CONFIG_LEN, Command};
use crate::gpio::{Gpio, PortState};

/// The status latch value, also the byte value sent to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    #[default]
    Success = 0,
    Fail = 1,
}

impl Status {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Status::Success),
            1 => Some(Status::Fail),
            _ => None,
        }
    }
}

/// Where command bytes come from.
pub trait CommandInput {
    /// Next byte, or `None` when the engine has to wait for more.
    fn read_byte(&mut self) -> Option<u8>;

    /// Offset of the next byte within the current packet.
    fn position(&self) -> usize;

    /// Move the read cursor back within the current packet.
    fn rewind(&mut self, position: usize);
}

/// Where response bytes go.
pub trait ResponseOutput {
    fn room_for_write(&self) -> bool;

    /// Only called after `room_for_write` returned `true`.
    fn write_byte(&mut self, byte: u8);
}

/// Outcome of one [`Engine::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No command in progress and no byte available.
    Idle,
    /// A command is parked at a wait-point.
    Suspended,
    /// A command ran to completion.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct LoopState {
    start: usize,
    count: u16,
    active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shift {
    config: ChannelConfig,
    num_bits: u8,
    bytes_left: u8,
    expected: Option<u8>,
    matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SetGet(u8),
    GetStatus,
    ReportFail,
    ConfigureIo,
    ConfigureChannel {
        channel: u8,
        raw: [u8; CHANNEL_CONFIG_LEN],
        filled: u8,
    },
    LoopBegin {
        low: Option<u8>,
    },
    ShiftHeader {
        channel: u8,
        num_bits: Option<u8>,
    },
    Shift(Shift),
}

enum Step {
    Next,
    Wait,
}

pub struct Engine {
    state: State,
    looping: LoopState,
    status: Status,
    status_sent: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub const fn new() -> Self {
        Self {
            state: State::Idle,
            looping: LoopState {
                start: 0,
                count: 0,
                active: false,
            },
            status: Status::Success,
            status_sent: false,
        }
    }

    pub const fn status(&self) -> Status {
        self.status
    }

    pub const fn loop_active(&self) -> bool {
        self.looping.active
    }

    pub const fn loop_count(&self) -> u16 {
        self.looping.count
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Run one bounded quantum: start the next command if none is in
    /// progress, then drive the current one until it completes or waits.
    pub fn advance<I, O, G>(
        &mut self,
        port: &mut PortState,
        input: &mut I,
        output: &mut O,
        gpio: &mut G,
    ) -> Progress
    where
        I: CommandInput + ?Sized,
        O: ResponseOutput + ?Sized,
        G: Gpio + ?Sized,
    {
        if self.state == State::Idle {
            let Some(byte) = input.read_byte() else {
                return Progress::Idle;
            };
            self.begin(Command::decode(byte), port, input, gpio);
        }

        while self.state != State::Idle {
            if let Step::Wait = self.resume(port, input, output, gpio) {
                return Progress::Suspended;
            }
        }

        Progress::Completed
    }

    fn begin<I, G>(&mut self, command: Command, port: &mut PortState, input: &mut I, gpio: &mut G)
    where
        I: CommandInput + ?Sized,
        G: Gpio + ?Sized,
    {
        trace!("command {:?}", command);

        self.state = match command {
            Command::Set(value) => {
                port.drive(gpio, value);
                State::Idle
            }
            Command::SetGet(value) => State::SetGet(value),
            Command::Shift { channel } => State::ShiftHeader {
                channel,
                num_bits: None,
            },
            Command::LoopBegin => State::LoopBegin { low: None },
            Command::LoopEnd => self.end_loop(input),
            Command::ConfigureChannel { channel } => State::ConfigureChannel {
                channel,
                raw: [0; CHANNEL_CONFIG_LEN],
                filled: 0,
            },
            Command::ClearStatus => {
                self.status = Status::Success;
                self.status_sent = false;
                State::Idle
            }
            Command::GetStatus => State::GetStatus,
            Command::ConfigureIo => State::ConfigureIo,
            Command::Reserved(_) => State::Idle,
        };
    }

    fn resume<I, O, G>(
        &mut self,
        port: &mut PortState,
        input: &mut I,
        output: &mut O,
        gpio: &mut G,
    ) -> Step
    where
        I: CommandInput + ?Sized,
        O: ResponseOutput + ?Sized,
        G: Gpio + ?Sized,
    {
        match self.state {
            State::Idle => Step::Next,
            State::SetGet(value) => {
                if !output.room_for_write() {
                    return Step::Wait;
                }
                let sample = port.sample_inputs(gpio);
                port.drive(gpio, value);
                output.write_byte(sample);
                self.state = State::Idle;
                Step::Next
            }
            State::GetStatus => {
                if !output.room_for_write() {
                    return Step::Wait;
                }
                output.write_byte(self.status.as_byte());
                self.status_sent = true;
                self.state = State::Idle;
                Step::Next
            }
            State::ReportFail => {
                if !output.room_for_write() {
                    return Step::Wait;
                }
                output.write_byte(Status::Fail.as_byte());
                self.state = State::Idle;
                Step::Next
            }
            State::ConfigureIo => {
                let Some(mask) = input.read_byte() else {
                    return Step::Wait;
                };
                port.apply_direction(gpio, mask);
                debug!("direction mask {:#04x}", port.direction());
                self.state = State::Idle;
                Step::Next
            }
            State::ConfigureChannel {
                channel,
                mut raw,
                filled,
            } => {
                let Some(byte) = input.read_byte() else {
                    return Step::Wait;
                };
                raw[filled as usize] = byte;
                let filled = filled + 1;
                self.state = if filled as usize == CHANNEL_CONFIG_LEN {
                    let config = ChannelConfig::from_bytes(raw);
                    debug!("channel {} -> {:?}", channel, config.mode);
                    port.channels[channel as usize] = config;
                    State::Idle
                } else {
                    State::ConfigureChannel {
                        channel,
                        raw,
                        filled,
                    }
                };
                Step::Next
            }
            State::LoopBegin { low: None } => {
                let Some(low) = input.read_byte() else {
                    return Step::Wait;
                };
                self.state = State::LoopBegin { low: Some(low) };
                Step::Next
            }
            State::LoopBegin { low: Some(low) } => {
                let Some(high) = input.read_byte() else {
                    return Step::Wait;
                };
                self.looping = LoopState {
                    start: input.position(),
                    count: u16::from_le_bytes([low, high]),
                    active: true,
                };
                debug!(
                    "loop x{} from offset {}",
                    self.looping.count, self.looping.start
                );
                self.state = State::Idle;
                Step::Next
            }
            State::ShiftHeader {
                channel,
                num_bits: None,
            } => {
                let Some(num_bits) = input.read_byte() else {
                    return Step::Wait;
                };
                self.state = State::ShiftHeader {
                    channel,
                    num_bits: Some(num_bits),
                };
                Step::Next
            }
            State::ShiftHeader {
                channel,
                num_bits: Some(num_bits),
            } => {
                let Some(num_bytes) = input.read_byte() else {
                    return Step::Wait;
                };
                let shift = Shift {
                    config: port.channels[channel as usize],
                    num_bits: clamp_tail(num_bits),
                    bytes_left: num_bytes,
                    expected: None,
                    matched: true,
                };
                self.state = if shift.config.mode == ChannelMode::DriveOnly {
                    let clocks = u16::from(num_bytes) * 8 + u16::from(shift.num_bits);
                    for _ in 0..clocks {
                        clock_bit(port, gpio, shift.config.zero);
                    }
                    State::Idle
                } else {
                    State::Shift(shift)
                };
                Step::Next
            }
            State::Shift(shift) => self.resume_shift(shift, port, input, output, gpio),
        }
    }

    fn resume_shift<I, O, G>(
        &mut self,
        mut shift: Shift,
        port: &mut PortState,
        input: &mut I,
        output: &mut O,
        gpio: &mut G,
    ) -> Step
    where
        I: CommandInput + ?Sized,
        O: ResponseOutput + ?Sized,
        G: Gpio + ?Sized,
    {
        let config = shift.config;
        let tail = shift.bytes_left == 0;
        let bits = if tail { shift.num_bits } else { 8 };

        match config.mode {
            ChannelMode::DriveOnly => {
                self.state = State::Idle;
                return Step::Next;
            }
            ChannelMode::ShiftOut => {
                let Some(data) = input.read_byte() else {
                    return Step::Wait;
                };
                clock_out(port, gpio, &config, data, bits, tail);
            }
            ChannelMode::ShiftIn => {
                if !output.room_for_write() {
                    return Step::Wait;
                }
                let sampled = clock_in(port, gpio, &config, bits, tail);
                output.write_byte(sampled);
            }
            ChannelMode::ShiftCompare => {
                let expected = match shift.expected {
                    Some(expected) => expected,
                    None => {
                        let Some(expected) = input.read_byte() else {
                            return Step::Wait;
                        };
                        shift.expected = Some(expected);
                        self.state = State::Shift(shift);
                        expected
                    }
                };
                let Some(mask) = input.read_byte() else {
                    return Step::Wait;
                };
                let sampled = clock_in(port, gpio, &config, bits, tail);
                shift.matched &= sampled & mask == expected & mask;
                shift.expected = None;
            }
        }

        if tail {
            self.state = if config.mode == ChannelMode::ShiftCompare {
                self.finish_compare(shift.matched)
            } else {
                State::Idle
            };
        } else {
            shift.bytes_left -= 1;
            self.state = State::Shift(shift);
        }
        Step::Next
    }

    fn finish_compare(&mut self, matched: bool) -> State {
        if self.looping.active {
            if matched {
                debug!("compare matched, leaving loop");
                self.looping.active = false;
            }
            return State::Idle;
        }

        if matched {
            return State::Idle;
        }

        self.status = Status::Fail;
        if self.status_sent {
            State::Idle
        } else {
            debug!("compare mismatch, reporting fail");
            self.status_sent = true;
            State::ReportFail
        }
    }

    fn end_loop<I: CommandInput + ?Sized>(&mut self, input: &mut I) -> State {
        let looping = &mut self.looping;
        let exhausted = if looping.count == 0 {
            true
        } else {
            looping.count -= 1;
            looping.count == 0
        };

        if !looping.active {
            return State::Idle;
        }

        if !exhausted {
            input.rewind(looping.start);
            return State::Idle;
        }

        debug!("loop exhausted without a match");
        looping.active = false;
        self.status = Status::Fail;
        self.status_sent = true;
        State::ReportFail
    }
}

fn clamp_tail(num_bits: u8) -> u8 {
    if (1..=8).contains(&num_bits) {
        num_bits
    } else {
        warn!("shift tail of {} bits clamped", num_bits);
        num_bits.clamp(1, 8)
    }
}

fn clock_bit<G: Gpio + ?Sized>(port: &mut PortState, gpio: &mut G, phases: Phases) {
    port.drive(gpio, phases.phase0);
    port.drive(gpio, phases.phase1);
}

/// Clock `bits` bits of `data` out LSB first. When `last` is set the final
/// bit carries the channel's overlay.
fn clock_out<G: Gpio + ?Sized>(
    port: &mut PortState,
    gpio: &mut G,
    config: &ChannelConfig,
    data: u8,
    bits: u8,
    last: bool,
) {
    for bit in 0..bits {
        let mut phases = config.phases_for(data >> bit & 1 != 0);
        if last && bit + 1 == bits {
            phases = phases.overlay(config.last_overlay);
        }
        clock_bit(port, gpio, phases);
    }
}

/// Clock `bits` bits with the zero pattern, sampling the input mask after
/// each phase pair and assembling the result LSB first.
fn clock_in<G: Gpio + ?Sized>(
    port: &mut PortState,
    gpio: &mut G,
    config: &ChannelConfig,
    bits: u8,
    last: bool,
) -> u8 {
    let mut value = 0;
    for bit in 0..bits {
        let mut phases = config.zero;
        if last && bit + 1 == bits {
            phases = phases.overlay(config.last_overlay);
        }
        clock_bit(port, gpio, phases);
        if gpio.read_input() & config.input_mask != 0 {
            value |= 1 << bit;
        }
    }
    value
}
