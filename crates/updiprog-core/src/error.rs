//! Error types for updiprog-core

use thiserror::Error;

/// Reason an Intel-HEX record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Record shorter than `:LLAAAATTCC`
    TooShort,
    /// Line does not start with ':'
    MissingStartCode,
    /// Non-hexadecimal character at the given column
    InvalidDigit(usize),
    /// Declared byte count does not match the line length
    LengthMismatch,
    /// Record type other than data, end-of-file or extended linear address
    UnsupportedRecord(u8),
    /// Extended linear address selects neither the code nor the fuse segment
    UnknownSegment(u16),
    /// Data record lands outside the destination buffer
    OutOfRange(usize),
    /// Fuse data seen before the fuse segment was selected
    NoFuseBuffer,
    /// Input ended without an end-of-file record
    MissingEndOfFile,
}

impl core::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooShort => write!(f, "record too short"),
            Self::MissingStartCode => write!(f, "record does not start with ':'"),
            Self::InvalidDigit(col) => write!(f, "invalid hex digit at column {}", col + 1),
            Self::LengthMismatch => write!(f, "record length does not match byte count"),
            Self::UnsupportedRecord(t) => write!(f, "unsupported record type 0x{:02X}", t),
            Self::UnknownSegment(s) => write!(f, "unknown segment 0x{:04X}", s),
            Self::OutOfRange(off) => write!(f, "offset 0x{:04X} out of range", off),
            Self::NoFuseBuffer => write!(f, "fuse data without fuse segment"),
            Self::MissingEndOfFile => write!(f, "missing end-of-file record"),
        }
    }
}

fn describe_response(response: &Option<u8>) -> String {
    match response {
        Some(b) => format!("0x{:02X}", b),
        None => "nothing".into(),
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Pin or timing subsystem unavailable
    #[error("I/O error: {0}")]
    Io(String),

    /// Double break / handshake failed after all retries
    #[error("UPDI link down")]
    LinkDown,

    /// NVM key exchange or reset-unlock sequence failed
    #[error("failed to unlock NVM programming mode")]
    UnlockFailed,

    /// Ready-wait or start-bit wait exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// NVM controller reported a write error
    #[error("NVM controller reported a write error")]
    WriteError,

    /// NVM controller did not become ready around a command
    #[error("NVM controller not ready")]
    NotReady,

    /// Target did not acknowledge a store
    #[error("expected ACK, got {}", describe_response(.response))]
    NoAck {
        /// Byte received instead of the ACK, if any
        response: Option<u8>,
    },

    /// Burst request outside protocol bounds
    #[error("burst of {len} bytes outside [{min}, {max}]")]
    SizeError {
        /// Requested length
        len: usize,
        /// Smallest accepted length
        min: usize,
        /// Largest accepted length
        max: usize,
    },

    /// Malformed Intel-HEX record
    #[error("line {line}: {kind}")]
    Format {
        /// 1-based line number
        line: usize,
        /// What was wrong with the record
        kind: FormatKind,
    },

    /// Read-back content differs from the source
    #[error("verify mismatch at 0x{address:04X}")]
    VerifyMismatch {
        /// Address of the page
        address: u16,
    },

    /// Explicit page erase failed
    #[error("page erase failed at 0x{address:04X}")]
    EraseFailed {
        /// Address of the page
        address: u16,
    },

    /// Invalid device or programmer configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// File access failed
    #[error(transparent)]
    File(#[from] std::io::Error),
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
