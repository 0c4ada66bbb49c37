//! Error types for tipc-rs
//!
//! Every fallible operation in the workspace returns [`Error`]. Would-block
//! conditions never appear here: they are absorbed by the reactor adapter.

use std::io;

/// Standard error type for TIPC socket and topology operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The deadline elapsed before the descriptor became ready
    #[error("deadline exceeded")]
    Timeout,

    /// The descriptor was closed before or during the operation
    #[error("use of closed descriptor")]
    Closed,

    /// A wire structure had the wrong length
    #[error("malformed {what}: expected {expected} bytes, got {actual}")]
    MalformedMessage {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A wire structure had the right length but an unusable field
    #[error("malformed {what}: invalid value {value:#x}")]
    InvalidField { what: &'static str, value: u64 },

    /// A local or remote address query failed
    #[error("{op}: address resolution failed: {source}")]
    AddressResolution {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The underlying socket primitive failed
    #[error("{op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tipc-rs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes that can be used for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout = 1,
    Closed = 2,
    MalformedMessage = 3,
    AddressResolution = 4,
    Os = 5,
    InvalidArgument = 6,
    Internal = 7,
}

impl Error {
    /// Tag an underlying primitive failure with the operation that produced it
    pub fn os(op: &'static str, source: io::Error) -> Self {
        Error::Os { op, source }
    }

    /// Build a length-mismatch error for a fixed-size wire structure
    pub fn malformed(what: &'static str, expected: usize, actual: usize) -> Self {
        Error::MalformedMessage {
            what,
            expected,
            actual,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Timeout => ErrorCode::Timeout,
            Error::Closed => ErrorCode::Closed,
            Error::MalformedMessage { .. } | Error::InvalidField { .. } => {
                ErrorCode::MalformedMessage
            }
            Error::AddressResolution { .. } => ErrorCode::AddressResolution,
            Error::Os { .. } => ErrorCode::Os,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Check if repeating the operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Os { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, error),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, error),
            Error::MalformedMessage { .. } | Error::InvalidField { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, error)
            }
            Error::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, error),
            Error::Os { source, .. } | Error::AddressResolution { source, .. } => source,
            Error::Internal(_) => io::Error::new(io::ErrorKind::Other, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Timeout.error_code(), ErrorCode::Timeout);
        assert_eq!(Error::Closed.error_code(), ErrorCode::Closed);
        assert_eq!(
            Error::InvalidField {
                what: "event",
                value: 9
            }
            .error_code(),
            ErrorCode::MalformedMessage
        );
        assert_eq!(
            Error::malformed("event", 44, 3).error_code(),
            ErrorCode::MalformedMessage
        );
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: io::Error = Error::Timeout.into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err: io::Error = Error::Closed.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let os = Error::os("bind", io::Error::from_raw_os_error(libc::EADDRINUSE));
        let err: io::Error = os.into();
        assert_eq!(err.raw_os_error(), Some(libc::EADDRINUSE));
    }

    #[test]
    fn test_display_names_operation() {
        let err = Error::os("connect", io::Error::from_raw_os_error(libc::EHOSTUNREACH));
        assert!(err.to_string().starts_with("connect: "));

        let err = Error::malformed("topology event", 44, 12);
        assert_eq!(
            err.to_string(),
            "malformed topology event: expected 44 bytes, got 12"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::Closed.is_retryable());
        assert!(Error::os("connect", io::Error::from(io::ErrorKind::ConnectionRefused)).is_retryable());
    }
}
