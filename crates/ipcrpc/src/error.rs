//! # Error Definitions
//!
//! `RpcError` covers failures of the message format itself. `ErrorCode` is the
//! application-level status a server puts at the head of every non-transport response.

use ipcpack::Error as PackError;

/// Failures while building or reading a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The underlying TLV encoding failed.
    Serialization(PackError),
    /// The message is structurally valid TLV but not a valid frame.
    ProtocolViolation(String),
    /// An unknown frame or value variant was encountered.
    UnknownVariant(String),
    /// A TLV item that has no `Value` counterpart (e.g. a list in argument position).
    UnsupportedType(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownVariant(name) => write!(f, "unknown variant '{}'", name),
            Self::UnsupportedType(what) => write!(f, "unsupported wire type: {}", what),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<PackError> for RpcError {
    fn from(e: PackError) -> Self {
        Self::Serialization(e)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Status of a remote operation, sent as `UInt64` in element 0 of a response.
///
/// New codes are appended, never inserted.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Everything is okay.
    Ok = 0,
    /// A generic error with no more specific code.
    Error = 1,
    /// A critical generic error.
    CriticalError = 2,
    /// A handle in the arguments does not resolve.
    InvalidReference = 3,
    /// Something could not be found.
    NotFound = 4,
    /// An index was out of bounds.
    OutOfBounds = 5,
    /// A handle table has no free ids left.
    OutOfIndexes = 6,
}

impl ErrorCode {
    pub fn from_u64(v: u64) -> Option<Self> {
        let code = match v {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::CriticalError,
            3 => Self::InvalidReference,
            4 => Self::NotFound,
            5 => Self::OutOfBounds,
            6 => Self::OutOfIndexes,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
