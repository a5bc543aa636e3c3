use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

use log::info;
use serialport::SerialPort;

use crate::config::SerialSettings;
use crate::drivers::port::ScpiLink;

/// SCPI lines over a serial device. Reads are bounded by the port timeout, so a
/// query the instrument never answers surfaces as an `ErrorKind::TimedOut`.
pub struct SerialLink {
    path: String,
    reader: BufReader<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        port.clear(serialport::ClearBuffer::All)?;
        info!("Opened {path} at {baud_rate} baud, timeout {} ms", timeout.as_millis());
        Ok(Self {
            path: path.to_string(),
            reader: BufReader::new(port),
        })
    }

    pub fn from_settings(path: &str, settings: &SerialSettings) -> serialport::Result<Self> {
        Self::open(path, settings.baud_rate, settings.timeout())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Names of the serial devices currently present.
    pub fn available_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
}

impl ScpiLink for SerialLink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} closed", self.path),
            ));
        }
        Ok(line)
    }
}
