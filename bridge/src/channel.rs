use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BAUD: u32 = 115200;
/// Short enough that a read with no pending data does not stall a tick.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("Channel is not open")]
    WriteOnClosedChannel,
    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Serial parameters for opening a channel. Always 8 data bits, no parity,
/// one stop bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub port: String,
    pub baud: u32,
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    /// Drop buffered input after each complete line so every read returns
    /// the freshest frame.
    pub discard_backlog: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud: DEFAULT_BAUD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            discard_backlog: true,
        }
    }
}

impl ChannelConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }
}

#[cfg(windows)]
fn default_port() -> &'static str {
    "COM3"
}

#[cfg(not(windows))]
fn default_port() -> &'static str {
    "/dev/ttyACM0"
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Duplex line-oriented transport to the device.
///
/// `read_line` never blocks longer than the configured read timeout:
/// `Ok(None)` means no complete line arrived in time, `Err` means the
/// channel itself failed.
pub trait LineChannel {
    fn open(&mut self, config: &ChannelConfig) -> Result<(), ChannelError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Send one line. The terminator is appended by the channel.
    fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;
    fn read_line(&mut self) -> Result<Option<String>, ChannelError>;
}

/// Names of the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<String>, ChannelError> {
    let ports = serialport::available_ports()
        .map_err(|e| ChannelError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Accumulates raw bytes and splits them into trimmed lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(data));
    }

    /// Take the next complete line, if one has been received.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.find('\n')?;
        let line = self.pending[..pos].trim().to_string();
        self.pending.drain(..=pos);
        Some(line)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// [`LineChannel`] over a serial port.
#[derive(Default)]
pub struct SerialLineChannel {
    port: Option<Box<dyn SerialPort>>,
    buffer: LineBuffer,
    discard_backlog: bool,
}

impl SerialLineChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_line(&mut self, port_clear: bool) -> Option<String> {
        let line = self.buffer.next_line()?;
        if self.discard_backlog {
            self.buffer.clear();
            if port_clear {
                if let Some(port) = &self.port {
                    if let Err(e) = port.clear(ClearBuffer::Input) {
                        tracing::debug!(%e, "Failed to discard serial input");
                    }
                }
            }
        }
        Some(line)
    }
}

impl LineChannel for SerialLineChannel {
    fn open(&mut self, config: &ChannelConfig) -> Result<(), ChannelError> {
        self.close();
        let port = serialport::new(&config.port, config.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| ChannelError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(port = %config.port, baud = config.baud, "Opened serial port");
        self.port = Some(port);
        self.discard_backlog = config.discard_backlog;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            tracing::info!(port = ?port.name(), "Closed serial port");
        }
        self.buffer.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let port = self
            .port
            .as_mut()
            .ok_or(ChannelError::WriteOnClosedChannel)?;
        port.write_all(line.to_uppercase().as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        tracing::debug!(line, "HOST->DEVICE");
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        if let Some(line) = self.take_line(false) {
            return Ok(Some(line));
        }

        let Some(port) = self.port.as_mut() else {
            return Ok(None);
        };

        let mut serial_buf = [0u8; 1000];
        match port.read(&mut serial_buf) {
            Ok(n) => self.buffer.push(&serial_buf[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(ChannelError::Io(e)),
        }

        let line = self.take_line(true);
        if let Some(line) = &line {
            tracing::debug!(line = %line, size = line.len(), "DEVICE->HOST");
        }
        Ok(line)
    }
}
