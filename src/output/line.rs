use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;

use super::ToneTransport;

/// Text protocol spoken by the buzzer firmware: one `"<hz>,0\n"` line per tone.
pub struct LineTransport<W: Write> {
    writer: W,
}

impl LineTransport<Box<dyn SerialPort>> {
    /// Opens the serial device. A write that cannot complete within
    /// `timeout` fails instead of blocking the caller.
    pub fn open(path: &Path, baud_rate: u32, timeout: Duration) -> std::io::Result<Self> {
        let port = serialport::new(path.to_string_lossy(), baud_rate)
            .timeout(timeout)
            .open()?;
        Ok(Self::new(port))
    }
}

impl<W: Write> LineTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write> ToneTransport for LineTransport<W> {
    fn write_tone(&mut self, hz: u32) -> std::io::Result<()> {
        writeln!(self.writer, "{hz},0")?;
        self.writer.flush()
    }
}

/// Frequencies written so far, parsed back out of the line protocol.
#[cfg(test)]
pub(crate) fn written_tones(bytes: &[u8]) -> Vec<u32> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| line.split(',').next()?.parse().ok())
        .collect()
}
