//! Serial device access
//!
//! Opens the detection device at the configured line speed and exposes it
//! to the async side as a buffered byte stream. `serialport` reads block, so
//! a dedicated thread pumps them into an in-memory pipe.
//!
//! Also holds the helpers behind the `ports` and `send-test` commands.

use crate::config::SerialSection;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Sample traffic written by `send-test`
pub const TEST_TOKENS: [&str; 5] = ["start", "(320,240)", "(150,200)", "(500,300)", "start"];

/// Pause between sample tokens
pub const TEST_TOKEN_INTERVAL: Duration = Duration::from_millis(500);

/// Size of the pipe between the reader thread and the async side
const PIPE_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Failed to open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Open the configured device, 8N1 at `baud_rate`
pub fn open(settings: &SerialSection) -> Result<Box<dyn SerialPort>, SerialError> {
    debug!(
        device = %settings.device,
        baud_rate = settings.baud_rate,
        timeout_ms = settings.timeout_ms,
        "Opening serial device"
    );
    serialport::new(&settings.device, settings.baud_rate)
        .timeout(Duration::from_millis(settings.timeout_ms))
        .open()
        .map_err(|source| SerialError::Open {
            device: settings.device.clone(),
            source,
        })
}

/// Serial ports present on this machine
pub fn available_ports() -> Result<Vec<SerialPortInfo>, SerialError> {
    serialport::available_ports().map_err(SerialError::Enumerate)
}

/// Human readable description of a port, `n/a` when nothing is known
pub fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            let name = usb
                .product
                .as_deref()
                .or(usb.manufacturer.as_deref())
                .unwrap_or("USB serial");
            format!("{name} [{:04x}:{:04x}]", usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

/// Stream the bytes of `source` into an async reader
///
/// The pump thread ends at end of input, on a read error, or at the first
/// read after the returned reader has been dropped. Read timeouts are
/// retried. Must be called inside a Tokio runtime.
pub fn spawn_reader<R>(source: R) -> Result<BufReader<DuplexStream>, SerialError>
where
    R: Read + Send + 'static,
{
    let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
    let runtime = Handle::current();
    std::thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || pump(source, writer, runtime))?;
    Ok(BufReader::new(reader))
}

fn pump<R: Read>(mut source: R, mut writer: DuplexStream, runtime: Handle) {
    let mut buffer = [0u8; 512];
    loop {
        match source.read(&mut buffer) {
            Ok(0) => {
                debug!("Serial source reached end of input");
                return;
            }
            Ok(read) => {
                if runtime.block_on(writer.write_all(&buffer[..read])).is_err() {
                    debug!("Serial reader dropped, stopping pump");
                    return;
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!(error = %e, "Serial read failed, stopping pump");
                return;
            }
        }
    }
}

/// Write each token as a line, pausing `interval` between them
pub fn write_tokens<W: Write>(
    writer: &mut W,
    tokens: &[&str],
    interval: Duration,
) -> io::Result<usize> {
    for (index, token) in tokens.iter().enumerate() {
        if index > 0 && !interval.is_zero() {
            std::thread::sleep(interval);
        }
        writer.write_all(token.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(token, "Sent test token");
    }
    Ok(tokens.len())
}

/// Lowercase hex without separators
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
