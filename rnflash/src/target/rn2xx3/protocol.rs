//! RN2xx3 bootloader wire format.
//!
//! Every command is a 10-byte frame, optionally followed by raw payload bytes
//! for write-type commands. The bootloader echoes a frame of the same shape,
//! followed by a command-specific secondary response.
//!
//! ```text
//! +------+-----+--------+--------+------+------+---------------------+
//! | 0x55 | Cmd | Len Lo | Len Hi | 0x55 | 0xAA |  Address (LE, u32)  |
//! +------+-----+--------+--------+------+------+---------------------+
//! |  1   |  1  |   1    |   1    |  1   |  1   |          4          |
//! +------+-----+--------+--------+------+------+---------------------+
//! ```
//!
//! The first byte lets the bootloader auto-detect the bit rate; the two key
//! bytes guard against treating line noise as a command.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Autobaud sentinel that opens every frame.
pub const AUTOBAUD: u8 = 0x55;

/// First key byte.
pub const KEY1: u8 = 0x55;

/// Second key byte.
pub const KEY2: u8 = 0xAA;

/// Size of a command frame and of the echoed response header.
pub const FRAME_SIZE: usize = 10;

/// Bootloader command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Command {
    /// Read the [`VersionInfo`] block.
    GetVersionInfo = 0x00,
    /// Read program memory.
    ReadFlash = 0x01,
    /// Program a block of flash.
    WriteFlash = 0x02,
    /// Erase flash rows.
    EraseFlash = 0x03,
    /// Read data EEPROM.
    ReadEe = 0x04,
    /// Write data EEPROM.
    WriteEe = 0x05,
    /// Read configuration words.
    ReadConfigurationWords = 0x06,
    /// Write configuration words.
    WriteConfigurationWords = 0x07,
    /// Checksum a flash range.
    CalculateChecksum = 0x08,
    /// Leave the bootloader and start the application.
    ResetDevice = 0x09,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::GetVersionInfo,
            0x01 => Self::ReadFlash,
            0x02 => Self::WriteFlash,
            0x03 => Self::EraseFlash,
            0x04 => Self::ReadEe,
            0x05 => Self::WriteEe,
            0x06 => Self::ReadConfigurationWords,
            0x07 => Self::WriteConfigurationWords,
            0x08 => Self::CalculateChecksum,
            0x09 => Self::ResetDevice,
            other => return Err(other),
        })
    }
}

/// How many secondary-response bytes follow the response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    /// No length is sent; read until the buffer is full or the line goes quiet.
    UntilTimeout,
    /// The echoed header's length field.
    FromHeader,
    /// A fixed number of bytes.
    Fixed(usize),
}

/// Status byte the bootloader returns for a successful write or erase.
pub const STATUS_OK: u8 = 0x01;

/// Secondary response size of [`Command::CalculateChecksum`].
///
/// Vendor documentation is ambiguous between a bare 16-bit checksum and a
/// status byte plus checksum; three bytes has not been confirmed on hardware.
pub const CHECKSUM_RESPONSE_SIZE: usize = 3;

impl Command {
    /// Secondary response length, keyed on the command that was sent.
    pub const fn response_length(self) -> ResponseLength {
        match self {
            Self::GetVersionInfo | Self::ResetDevice => ResponseLength::UntilTimeout,
            Self::ReadFlash | Self::ReadEe | Self::ReadConfigurationWords => {
                ResponseLength::FromHeader
            },
            Self::WriteFlash | Self::EraseFlash | Self::WriteEe | Self::WriteConfigurationWords => {
                ResponseLength::Fixed(1)
            },
            Self::CalculateChecksum => ResponseLength::Fixed(CHECKSUM_RESPONSE_SIZE),
        }
    }
}

/// A command frame ready to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command code.
    pub command: Command,
    /// Length field: payload size, block count or bytes to read.
    pub length: u16,
    /// Target address.
    pub address: u32,
}

impl CommandFrame {
    /// Frame without payload or address.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            length: 0,
            address: 0,
        }
    }

    /// Frame whose length field covers `len` bytes.
    ///
    /// Fails if `len` does not fit the 16-bit length field.
    pub fn with_len(command: Command, len: usize, address: u32) -> Result<Self> {
        let length = u16::try_from(len).map_err(|_| {
            Error::Config(format!(
                "{command:?} length {len} exceeds the 16-bit frame field"
            ))
        })?;
        Ok(Self {
            command,
            length,
            address,
        })
    }

    /// Encode the frame.
    pub fn build(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        frame[0] = AUTOBAUD;
        frame[1] = self.command as u8;
        LittleEndian::write_u16(&mut frame[2..4], self.length);
        frame[4] = KEY1;
        frame[5] = KEY2;
        LittleEndian::write_u32(&mut frame[6..10], self.address);
        frame
    }
}

/// The echoed header that precedes every bootloader response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Raw command byte as echoed.
    pub command: u8,
    /// Echoed length field.
    pub length: u16,
    /// Echoed address.
    pub address: u32,
}

impl ResponseHeader {
    /// Decode a full header.
    pub fn parse(bytes: &[u8; FRAME_SIZE]) -> Self {
        Self {
            command: bytes[1],
            length: LittleEndian::read_u16(&bytes[2..4]),
            address: LittleEndian::read_u32(&bytes[6..10]),
        }
    }

    /// Echoed command, if it is a known code.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }
}

/// Bootloader identification block returned by [`Command::GetVersionInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VersionInfo {
    /// Bootloader version (major in the high byte).
    pub version: u16,
    /// PIC device ID.
    pub device_id: u16,
    /// Bytes erased by one erase block (PIC18 flash is byte addressed).
    pub erase_row_size: u8,
    /// Bytes held by the write latch.
    pub write_latch_size: u8,
    /// User ID locations.
    pub user_id: [u8; 4],
}

impl VersionInfo {
    /// Size of the block on the wire.
    pub const SIZE: usize = 16;

    /// Decode from a possibly short response.
    ///
    /// Only the bytes present are copied; missing trailing fields stay zero.
    pub fn from_prefix(bytes: &[u8]) -> Self {
        let mut raw = [0u8; Self::SIZE];
        let n = bytes.len().min(Self::SIZE);
        raw[..n].copy_from_slice(&bytes[..n]);

        Self {
            version: LittleEndian::read_u16(&raw[0..2]),
            device_id: LittleEndian::read_u16(&raw[6..8]),
            erase_row_size: raw[10],
            write_latch_size: raw[11],
            user_id: [raw[12], raw[13], raw[14], raw[15]],
        }
    }

    /// Version formatted as `major.minor`.
    pub fn version_string(&self) -> String {
        let [minor, major] = self.version.to_le_bytes();
        format!("{major}.{minor}")
    }
}
