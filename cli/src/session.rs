use std::ops::ControlFlow;
use std::time::Duration;

use color_eyre::{
    Report, Result,
    eyre::{WrapErr, bail, eyre},
};
use protocol::{PACKET_SIZE, USB_PID, USB_VID};
use protocol_host::Batch;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{
    SerialPort, SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream,
};
use tracing::{debug, info, trace};

/// An open connection to the device's virtual serial port.
pub struct Session {
    stream: SerialStream,
    timeout: Duration,
}

impl Session {
    pub async fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let mut stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(timeout)
            .open_native_async()
            .wrap_err_with(|| format!("failed to open serial port {port}"))?;

        stream
            .clear(tokio_serial::ClearBuffer::All)
            .wrap_err("failed to clear serial port buffers")?;

        debug!("connected to {port} @ {baud_rate} baud");
        Ok(Self { stream, timeout })
    }

    /// Send every packet of `batch` as its own write, then collect the
    /// solicited response bytes.
    pub async fn run(&mut self, batch: &Batch) -> Result<Vec<u8>> {
        for packet in &batch.packets {
            trace!("-> {:02x?}", packet);
            self.stream
                .write_all(packet)
                .await
                .wrap_err("serial write failed")?;
        }
        self.stream.flush().await.wrap_err("serial flush failed")?;

        self.read(batch.expected_responses).await
    }

    /// Write `batch` while handing every byte the device sends back to
    /// `on_byte`, until it breaks.
    ///
    /// Reading runs alongside the writes: a long batch fills the device's
    /// transmit side well before the host has sent all of it. The timeout
    /// applies to the gap between response bytes.
    pub async fn stream<F>(&mut self, batch: &Batch, mut on_byte: F) -> Result<()>
    where
        F: FnMut(u8) -> Result<ControlFlow<()>>,
    {
        let gap = self.timeout;
        let (mut reader, mut writer) = tokio::io::split(&mut self.stream);

        let write = async move {
            for packet in &batch.packets {
                trace!("-> {:02x?}", packet);
                writer
                    .write_all(packet)
                    .await
                    .wrap_err("serial write failed")?;
            }
            writer.flush().await.wrap_err("serial flush failed")?;
            debug!("all {} packets written", batch.packets.len());
            Ok::<_, Report>(())
        };

        let read = async move {
            let mut buf = [0u8; PACKET_SIZE];
            'read: loop {
                let n = match timeout(gap, reader.read(&mut buf)).await {
                    Err(_) => bail!("no response from the device for {gap:?}"),
                    Ok(read) => read.wrap_err("serial read failed")?,
                };
                if n == 0 {
                    bail!("serial port closed");
                }
                trace!("<- {:02x?}", &buf[..n]);
                for &byte in &buf[..n] {
                    if on_byte(byte)?.is_break() {
                        break 'read;
                    }
                }
            }
            Ok::<_, Report>(())
        };

        tokio::pin!(write, read);
        tokio::select! {
            done = &mut read => done,
            written = &mut write => {
                written?;
                read.await
            }
        }
    }

    pub async fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut response = vec![0; count];
        if count == 0 {
            return Ok(response);
        }

        match timeout(self.timeout, self.stream.read_exact(&mut response)).await {
            Err(_) => bail!(
                "timed out after {:?} waiting for {count} response bytes",
                self.timeout
            ),
            Ok(Err(e)) => Err(eyre!(e).wrap_err("serial read failed")),
            Ok(Ok(_)) => {
                trace!("<- {:02x?}", response);
                Ok(response)
            }
        }
    }
}

pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
    tokio_serial::available_ports().wrap_err("failed to enumerate serial ports")
}

/// Whether a port belongs to a Shifty device.
pub fn is_shifty(port: &SerialPortInfo) -> bool {
    matches!(
        &port.port_type,
        SerialPortType::UsbPort(usb) if usb.vid == USB_VID && usb.pid == USB_PID
    )
}

/// Find the first connected Shifty by its USB vendor and product id.
pub fn detect_port() -> Result<String> {
    let port = available_ports()?
        .into_iter()
        .find(is_shifty)
        .ok_or_else(|| {
            eyre!("no device with USB id {USB_VID:04x}:{USB_PID:04x} found; pass --port")
        })?;
    info!("using {} ({USB_VID:04x}:{USB_PID:04x})", port.port_name);
    Ok(port.port_name)
}
