//! Error types for rnflash.

use std::io;
use thiserror::Error;

use crate::image::ihex::RecordType;
use crate::target::rn2xx3::protocol::Command;

/// Result type for rnflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a single Intel HEX line is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    /// Line is too short, too long, lacks the start code or holds non-hex characters.
    #[error("malformed line: {0}")]
    MalformedLine(&'static str),

    /// Declared byte count disagrees with the number of characters on the line.
    #[error(
        "record declares {declared} data bytes ({expected} characters) but the line has {actual}"
    )]
    LengthMismatch {
        /// Byte count field of the record.
        declared: u8,
        /// Line length implied by the byte count.
        expected: usize,
        /// Actual line length.
        actual: usize,
    },

    /// Two's-complement sum over the record is not zero.
    #[error("checksum mismatch: record checksum {declared:#04x}, byte sum {sum:#04x}")]
    ChecksumMismatch {
        /// Checksum byte stored in the record.
        declared: u8,
        /// Sum of all record bytes including the checksum.
        sum: u8,
    },

    /// Record type field holds a value outside 0x00..=0x05.
    #[error("unknown record type {0:#04x}")]
    UnknownRecordType(u8),
}

/// Error type for rnflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid Intel HEX record.
    #[error("Invalid HEX record: {0}")]
    Hex(#[from] HexError),

    /// An error raised while processing a specific image line (1-based).
    #[error("line {line}: {source}")]
    Line {
        /// Line number within the image.
        line: usize,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A well-formed record this updater does not accept.
    #[error("Unsupported record type: {0:?}")]
    UnsupportedRecord(RecordType),

    /// The image ran out of lines before an end-of-file record.
    #[error("Image has no end-of-file record")]
    MissingEndOfFile,

    /// The page-start hook refused a new page.
    #[error("Failed to start page at 0x{address:08X}: {source}")]
    PageStartFailed {
        /// Page-aligned start address.
        address: u32,
        /// Failure reported by the hook.
        #[source]
        source: Box<Error>,
    },

    /// The page-complete hook failed to commit a page.
    #[error("Failed to flush page at 0x{address:08X}: {source}")]
    PageFlushFailed {
        /// Page-aligned start address.
        address: u32,
        /// Failure reported by the hook.
        #[source]
        source: Box<Error>,
    },

    /// The bootloader did not answer a command.
    #[error("No response to {0:?}")]
    NoResponse(Command),

    /// The bootloader answered with fewer bytes than the response requires.
    #[error("Truncated response to {command:?}: {received} of {expected} bytes")]
    TruncatedResponse {
        /// Command that was sent.
        command: Command,
        /// Bytes received.
        received: usize,
        /// Bytes required.
        expected: usize,
    },

    /// The response payload would not fit the receive buffer.
    #[error("Response to {command:?} needs {expected} bytes, buffer holds {capacity}")]
    ResponseTooLarge {
        /// Command that was sent.
        command: Command,
        /// Payload length the command implies.
        expected: usize,
        /// Receive buffer capacity.
        capacity: usize,
    },

    /// The bootloader reported a failed write or erase.
    #[error("{command:?} rejected with status {status:#04x}")]
    StatusRejected {
        /// Command that was sent.
        command: Command,
        /// Status byte returned (1 means success).
        status: u8,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The module answered but is not an RN2483/RN2903.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// No usable serial port was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// The embedding application asked to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// Unsupported module or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Attach the 1-based image line number to this error.
    #[must_use]
    pub fn at_line(self, line: usize) -> Self {
        Self::Line {
            line,
            source: Box::new(self),
        }
    }

    /// Strip line context and return the underlying error.
    pub fn root(&self) -> &Self {
        match self {
            Self::Line { source, .. } => source.root(),
            other => other,
        }
    }
}
