use clap::Parser;
use color_eyre::{Result, eyre::OptionExt};
use protocol::Status;
use protocol_host::{
    Batch, EncodeError, HOST_PACKET_SIZE, Jtag, Programmer, TapState, bits_from_bytes,
    decode_status,
};
use tracing::info;

use crate::{
    cli::{Cli, Command},
    config::Config,
    session::Session,
};

mod cli;
mod config;
mod logging;
mod program;
mod session;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();
    logging::init(args.verbose)?;

    if args.command == Command::Ports {
        for port in session::available_ports()? {
            if session::is_shifty(&port) {
                println!("{}  (shifty)", port.port_name);
            } else {
                println!("{}", port.port_name);
            }
        }
        return Ok(());
    }

    let config = Config::load(&args)?;
    let port = match config.port.clone() {
        Some(port) => port,
        None => session::detect_port()?,
    };

    if let Command::Program { file } = &args.command {
        let plan = program::load(file)?;
        let gap = config.timeout().max(program::MIN_RESPONSE_GAP);
        let mut session = Session::open(&port, config.baud_rate, gap).await?;
        program::run(&mut session, &plan).await?;
        println!("programmed {}", file.display());
        return Ok(());
    }

    let batch = build_batch(&args.command)?;
    info!(
        "sending {} packets, expecting {} bytes back",
        batch.packets.len(),
        batch.expected_responses
    );

    let mut session = Session::open(&port, config.baud_rate, config.timeout()).await?;
    let response = session.run(&batch).await?;

    let output = render(&args.command, &response)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn build_batch(command: &Command) -> Result<Batch, EncodeError> {
    let mut programmer = Programmer::new();
    match command {
        Command::Ports | Command::Program { .. } => {}
        Command::Io { mask } => programmer.configure_io(*mask)?,
        Command::Set { value } => programmer.set(*value)?,
        Command::Get { value } => programmer.set_get(*value)?,
        Command::Status => programmer.get_status()?,
        Command::Clear => programmer.clear_status()?,
        Command::Idcode => {
            let mut jtag = Jtag::new(programmer)?;
            jtag.read_dr(32)?;
            jtag.goto(TapState::RunTestIdle)?;
            return jtag.finish();
        }
        Command::Raw { bytes, read } => {
            return Ok(Batch {
                packets: bytes.chunks(HOST_PACKET_SIZE).map(<[u8]>::to_vec).collect(),
                expected_responses: *read,
            });
        }
    }
    programmer.finish()
}

fn render(command: &Command, response: &[u8]) -> Result<String> {
    Ok(match command {
        Command::Get { .. } => {
            let pins = response.first().ok_or_eyre("no pin sample received")?;
            format_pins(*pins)
        }
        Command::Status => {
            let byte = response.first().ok_or_eyre("no status received")?;
            match decode_status(*byte)? {
                Status::Success => "success".into(),
                Status::Fail => "fail".into(),
            }
        }
        Command::Idcode => format_idcode(bits_from_bytes(response, 32)? as u32),
        Command::Raw { .. } => response
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" "),
        Command::Ports
        | Command::Io { .. }
        | Command::Set { .. }
        | Command::Clear
        | Command::Program { .. } => String::new(),
    })
}

fn format_pins(value: u8) -> String {
    format!("0x{value:02x} (0b{value:06b})")
}

fn format_idcode(id: u32) -> String {
    let mut out = format!(
        "IDCODE 0x{id:08x}\n  version      0x{:x}\n  part         0x{:04x}\n  manufacturer 0x{:03x}",
        (id >> 28) & 0xf,
        (id >> 12) & 0xffff,
        (id >> 1) & 0x7ff
    );
    if id & 1 == 0 || id == u32::MAX {
        out.push_str("\n  (not a valid IDCODE; check wiring and target power)");
    }
    out
}
