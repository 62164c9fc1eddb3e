use std::io;
use thiserror::Error;

/// The primary error type for the `histacc` library.
#[derive(Error, Debug)]
pub enum HistError {
    #[error("Unknown command byte 0x{0:02x} (link out of sync?)")]
    UnknownCommand(u8),

    #[error("Serial port {port} unavailable: {source}")]
    TransportUnavailable {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout waiting for {operation}: received {received} of {expected} byte(s)")]
    Timeout {
        operation: &'static str,
        received: usize,
        expected: usize,
    },

    #[error("{operation} cancelled while waiting for the peripheral")]
    Cancelled { operation: &'static str },

    #[error("Malformed upload: expected {expected} bytes, got {actual}")]
    MalformedUpload { expected: usize, actual: usize },

    #[error("Malformed upload: payload of {len} bytes ends with an incomplete sample")]
    OddPayload { len: usize },
}

impl HistError {
    /// True for both flavours of a badly framed upload.
    pub fn is_malformed_upload(&self) -> bool {
        matches!(self, HistError::MalformedUpload { .. } | HistError::OddPayload { .. })
    }

    /// Timeouts, cancellations and unknown bytes leave the link in an unknown
    /// state but are recoverable after [`Driver::resync`](crate::Driver::resync).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HistError::Timeout { .. } | HistError::Cancelled { .. } | HistError::UnknownCommand(_)
        )
    }
}
