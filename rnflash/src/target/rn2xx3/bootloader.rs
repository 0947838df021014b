//! RN2xx3 bootloader and application-mode commands.
//!
//! The bootloader speaks the binary frames from [`super::protocol`]; one
//! command is outstanding at a time and nothing is retried here. The module
//! application understands CR/LF terminated text commands, of which only the
//! two that move between application and bootloader are used.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::target::rn2xx3::protocol::{
    CHECKSUM_RESPONSE_SIZE, Command, CommandFrame, FRAME_SIZE, ResponseHeader, ResponseLength,
    STATUS_OK, VersionInfo,
};

/// Size of the response buffer.
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 128;

/// How long the application may take to print its identity after a reset.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between `sys reset` and the first identity read.
const RESET_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Application command that reboots the module.
const SYS_RESET: &[u8] = b"sys reset\r\n";

/// Application command that erases the firmware and enters the bootloader.
const SYS_ERASE_FW: &[u8] = b"sys eraseFW\r\n";

/// Substring every module identity line carries.
const IDENTITY_MARKER: &str = "RN";

/// Model prefixes this updater accepts.
pub const SUPPORTED_MODELS: &[&str] = &["RN2483", "RN2903"];

/// Bootloader session over a serial port.
pub struct Bootloader<P: Port> {
    port: P,
    input: Vec<u8>,
    identity_timeout: Duration,
}

impl<P: Port> Bootloader<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            input: vec![0; DEFAULT_INPUT_BUFFER_SIZE],
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
        }
    }

    /// Set the response buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.input = vec![0; size];
        self
    }

    /// Set the deadline for the identity line after an application reset.
    #[must_use]
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send a frame followed by its payload.
    pub fn send_command(&mut self, frame: &CommandFrame, payload: &[u8]) -> Result<()> {
        let header = frame.build();
        trace!("TX {:?}: {}", frame.command, hex_dump(&header));

        let mut data = Vec::with_capacity(FRAME_SIZE + payload.len());
        data.extend_from_slice(&header);
        data.extend_from_slice(payload);
        self.port.write_all_bytes(&data)
    }

    /// Read the bootloader version block.
    ///
    /// The block is decoded from however many bytes arrived, up to the
    /// response buffer size.
    pub fn get_version_info(&mut self) -> Result<VersionInfo> {
        debug!("Reading bootloader version info");
        self.send_command(&CommandFrame::new(Command::GetVersionInfo), &[])?;

        let (_, n) = read_response(&mut self.port, Command::GetVersionInfo, &mut self.input)?;
        if n == 0 {
            return Err(Error::NoResponse(Command::GetVersionInfo));
        }
        Ok(VersionInfo::from_prefix(&self.input[..n]))
    }

    /// Read `buf.len()` bytes of flash starting at `address`.
    ///
    /// Returns the number of bytes received.
    pub fn read_flash(&mut self, address: u32, buf: &mut [u8]) -> Result<usize> {
        debug!("Reading {} bytes at 0x{address:08X}", buf.len());
        self.send_command(
            &CommandFrame::with_len(Command::ReadFlash, buf.len(), address)?,
            &[],
        )?;

        let (_, n) = read_response(&mut self.port, Command::ReadFlash, buf)?;
        Ok(n)
    }

    /// Program `data` at `address`.
    pub fn write_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        debug!("Writing {} bytes at 0x{address:08X}", data.len());
        let frame = CommandFrame::with_len(Command::WriteFlash, data.len(), address)?;
        self.send_command(&frame, data)?;
        self.expect_status(Command::WriteFlash)
    }

    /// Erase `block_count` erase rows starting at `address`.
    pub fn erase_flash(&mut self, address: u32, block_count: u8) -> Result<()> {
        debug!("Erasing {block_count} rows at 0x{address:08X}");
        let frame = CommandFrame {
            command: Command::EraseFlash,
            length: u16::from(block_count),
            address,
        };
        self.send_command(&frame, &[])?;
        self.expect_status(Command::EraseFlash)
    }

    /// Ask the bootloader to checksum `length` bytes at `address`.
    ///
    /// The three response bytes are returned raw. Their layout (status plus
    /// 16-bit sum, or sum plus padding) has not been confirmed on hardware.
    pub fn calculate_checksum(
        &mut self,
        address: u32,
        length: u16,
    ) -> Result<[u8; CHECKSUM_RESPONSE_SIZE]> {
        let frame = CommandFrame {
            command: Command::CalculateChecksum,
            length,
            address,
        };
        self.send_command(&frame, &[])?;

        let (_, n) = read_response(&mut self.port, Command::CalculateChecksum, &mut self.input)?;
        match n {
            0 => Err(Error::NoResponse(Command::CalculateChecksum)),
            CHECKSUM_RESPONSE_SIZE => {
                let mut out = [0u8; CHECKSUM_RESPONSE_SIZE];
                out.copy_from_slice(&self.input[..CHECKSUM_RESPONSE_SIZE]);
                Ok(out)
            },
            received => Err(Error::TruncatedResponse {
                command: Command::CalculateChecksum,
                received,
                expected: CHECKSUM_RESPONSE_SIZE,
            }),
        }
    }

    /// Leave the bootloader. No response is awaited.
    pub fn bootloader_reset(&mut self) -> Result<()> {
        info!("Resetting out of bootloader");
        self.send_command(&CommandFrame::new(Command::ResetDevice), &[])
    }

    /// Erase the application firmware, which makes the module enter its
    /// bootloader.
    pub fn erase_firmware(&mut self) -> Result<()> {
        info!("Erasing module firmware");
        self.port.write_all_bytes(SYS_ERASE_FW)
    }

    /// Reboot the application and return its identity line.
    ///
    /// Lines not containing `RN` are skipped until the identity timeout. The
    /// first line that does must name a supported model.
    pub fn application_reset(&mut self) -> Result<String> {
        info!("Resetting module application");
        self.port.write_all_bytes(SYS_RESET)?;
        thread::sleep(RESET_SETTLE_DELAY);

        let deadline = Instant::now() + self.identity_timeout;
        while Instant::now() < deadline {
            let raw = self
                .port
                .read_until_deadline(b'\n', self.input.len(), deadline)?;
            if raw.is_empty() {
                continue;
            }

            let line = String::from_utf8_lossy(&raw).trim().to_string();
            trace!("Application: {line:?}");
            if !line.contains(IDENTITY_MARKER) {
                debug!("Skipping application output {line:?}");
                continue;
            }

            if SUPPORTED_MODELS.iter().any(|model| line.contains(model)) {
                info!("Module identified: {line}");
                return Ok(line);
            }
            return Err(Error::UnknownDevice(line));
        }

        Err(Error::Timeout(format!(
            "no module identity within {} ms",
            self.identity_timeout.as_millis()
        )))
    }

    fn expect_status(&mut self, command: Command) -> Result<()> {
        let (_, n) = read_response(&mut self.port, command, &mut self.input)?;
        if n == 0 {
            return Err(Error::NoResponse(command));
        }
        match self.input[0] {
            STATUS_OK => Ok(()),
            status => Err(Error::StatusRejected { command, status }),
        }
    }
}

/// Read the response header and the secondary response for `sent`.
///
/// The secondary length comes from the command that was sent, never from the
/// echoed command byte. Returns the header and the secondary bytes stored in
/// `secondary`.
fn read_response<P: Port>(
    port: &mut P,
    sent: Command,
    secondary: &mut [u8],
) -> Result<(ResponseHeader, usize)> {
    let mut raw = [0u8; FRAME_SIZE];
    let received = port.read_bytes(&mut raw)?;
    trace!("RX header: {}", hex_dump(&raw[..received]));

    if received == 0 {
        return Err(Error::NoResponse(sent));
    }
    if received < FRAME_SIZE {
        return Err(Error::TruncatedResponse {
            command: sent,
            received,
            expected: FRAME_SIZE,
        });
    }

    let header = ResponseHeader::parse(&raw);
    if header.command != sent as u8 {
        warn!(
            "Response echoes command {:#04x}, expected {:?}",
            header.command, sent
        );
    }

    let expected = match sent.response_length() {
        ResponseLength::UntilTimeout => secondary.len(),
        ResponseLength::FromHeader => usize::from(header.length),
        ResponseLength::Fixed(n) => n,
    };
    if expected > secondary.len() {
        port.clear_buffers()?;
        return Err(Error::ResponseTooLarge {
            command: sent,
            expected,
            capacity: secondary.len(),
        });
    }

    let n = port.read_bytes(&mut secondary[..expected])?;
    trace!("RX {sent:?}: {}", hex_dump(&secondary[..n]));
    Ok((header, n))
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
