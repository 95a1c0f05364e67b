//! Error types for stm8bsl.

use std::io;
use thiserror::Error;

/// Result type for stm8bsl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stm8bsl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a closed port handle.
    #[error("port is not open")]
    NotOpen,

    /// The port could not be opened.
    #[error("cannot open port {port}: {source}")]
    OpenFailed {
        /// Name of the port that failed to open.
        port: String,
        /// Underlying serial error.
        source: serialport::Error,
    },

    /// Line parameters could not be applied to the port.
    #[error("cannot configure port: {0}")]
    ConfigFailed(#[source] serialport::Error),

    /// The port could not be released cleanly.
    #[error("cannot close port: {0}")]
    CloseFailed(#[source] io::Error),

    /// The OS accepted fewer bytes than requested.
    #[error("short write: {sent} of {expected} bytes accepted")]
    SendShort {
        /// Number of bytes handed to the transport.
        expected: usize,
        /// Number of bytes the OS actually accepted.
        sent: usize,
    },

    /// The expected response did not arrive within the read timeout.
    #[error("response timeout: received {got} of {wanted} bytes")]
    Timeout {
        /// Number of bytes the transaction expected.
        wanted: usize,
        /// Number of bytes that arrived before the deadline.
        got: usize,
    },

    /// A byte in an acknowledge slot was neither ACK nor (where permitted)
    /// NACK, or a command echo in the GET response did not match.
    #[error("unexpected response {got:#04x} (expected {expected:#04x})")]
    UnexpectedByte {
        /// The byte the protocol requires at this position.
        expected: u8,
        /// The byte actually received.
        got: u8,
    },

    /// All synchronization rounds elapsed without a valid reply.
    #[error("synchronization failed: {}", .last.map_or_else(|| "no reply from bootloader".to_string(), |b| format!("last reply was {b:#04x}")))]
    SyncFailed {
        /// Reply byte of the final round, if one arrived at all.
        last: Option<u8>,
    },

    /// No flash density probe succeeded; the device cannot be identified.
    #[error("cannot identify device: no flash density probe succeeded")]
    DeviceNotIdentified,

    /// The target answered with a malformed response.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// I/O error on the underlying serial line.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_failed_display_without_reply() {
        let err = Error::SyncFailed { last: None };
        assert!(err.to_string().contains("no reply"));
    }

    #[test]
    fn test_sync_failed_display_with_reply() {
        let err = Error::SyncFailed { last: Some(0x42) };
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_unexpected_byte_display() {
        let err = Error::UnexpectedByte {
            expected: 0x79,
            got: 0x1F,
        };
        let text = err.to_string();
        assert!(text.contains("0x1f"));
        assert!(text.contains("0x79"));
    }
}
