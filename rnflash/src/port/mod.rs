//! Serial transport abstraction.
//!
//! The bootloader and application protocols only depend on the [`Port`]
//! trait, so they can be driven by a real serial device or by an in-memory
//! double in tests.
//!
//! ```text
//! +--------------------+
//! |  Bootloader / App  |
//! |     protocols      |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  NativePort (8N1)  |
//! |    (serialport)    |
//! +--------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use rnflash::port::Port;
//!
//! fn ping<P: Port>(port: &mut P) -> rnflash::Result<Vec<u8>> {
//!     port.write_all_bytes(b"sys get ver\r\n")?;
//!     port.read_until(b'\n', 128)
//! }
//! ```

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Serial port configuration.
///
/// RN2xx3 modules always use 8 data bits, no parity, one stop bit and no
/// flow control, so only the name, speed and timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 57600,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte stream to an RN2xx3 module.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Fill `buf` as far as the device delivers before a timeout.
    ///
    /// Returns the number of bytes stored. A timeout is not an error; it
    /// simply ends the read early.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Read until `terminator`, a timeout, or `max` bytes.
    ///
    /// The terminator is consumed but not returned.
    fn read_until(&mut self, terminator: u8, max: usize) -> Result<Vec<u8>> {
        read_line(self, terminator, max, None)
    }

    /// Like [`Port::read_until`], but also stops once `deadline` has passed.
    ///
    /// The deadline is checked before every byte, so a device that trickles
    /// output can overrun it by at most one port timeout.
    fn read_until_deadline(
        &mut self,
        terminator: u8,
        max: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        read_line(self, terminator, max, Some(deadline))
    }
}

fn read_line<P: Port + ?Sized>(
    port: &mut P,
    terminator: u8,
    max: usize,
    deadline: Option<Instant>,
) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while line.len() < max {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == terminator => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(line)
}

#[cfg(feature = "native")]
pub use native::NativePort;
