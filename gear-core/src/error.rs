//! Error types for the gear client, worker and admin engines.
//!
//! All fallible operations return `Result<T, GearError>`.
//! Invalid input never panics; every failure is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for gear.
#[derive(Debug, Error)]
pub enum GearError {
    // ── Configuration Errors ─────────────────────────────────────
    /// A submission or work cycle was attempted with an empty server list.
    #[error("no servers configured")]
    NoServers,

    /// A host could not be resolved or the port is out of range.
    #[error("cannot resolve {target}: {reason}")]
    AddressResolution { target: String, reason: String },

    /// `work()` was called on a worker with nothing registered.
    #[error("no functions registered")]
    NoRegisteredFunctions,

    /// A caller-supplied value cannot be put on the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Connection Errors ────────────────────────────────────────
    /// Connecting, sending or receiving on a server socket failed.
    #[error("connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Raw I/O failure below the connection layer (codec buffers).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Protocol Errors ──────────────────────────────────────────
    /// Bytes on the wire do not form a valid frame or line.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A declared frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An outgoing body exceeds the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The server answered with an `ERROR` packet or an `ERR` line.
    #[error("server error {code}: {message}")]
    ServerError { code: String, message: String },

    /// An echo reply did not carry the bytes that were sent.
    #[error("echo reply did not match the request")]
    EchoMismatch,

    /// The engine was driven in a way its current state does not allow.
    #[error("unknown state: {0}")]
    UnknownState(String),

    // ── Job Errors ───────────────────────────────────────────────
    /// A worker handler returned an error or panicked.
    #[error("handler for {function} failed on {handle}: {reason}")]
    HandlerFailure {
        function: String,
        handle: String,
        reason: String,
    },

    /// A serializer rejected a value.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GearError {
    /// Wrap an I/O error with the endpoint it happened on.
    pub fn connection(endpoint: impl ToString, source: std::io::Error) -> Self {
        GearError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// `true` for errors that leave the engine usable for a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GearError::Timeout(_) | GearError::ConnectionFailed { .. } | GearError::Io(_)
        )
    }
}

impl From<std::string::FromUtf8Error> for GearError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GearError::MalformedPacket(format!("invalid utf-8: {e}"))
    }
}

impl From<std::str::Utf8Error> for GearError {
    fn from(e: std::str::Utf8Error) -> Self {
        GearError::MalformedPacket(format!("invalid utf-8: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, GearError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GearError::NoServers;
        assert!(e.to_string().contains("no servers"));

        let e = GearError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = GearError::ServerError {
            code: "ERR_QUEUE_FULL".into(),
            message: "queue is full".into(),
        };
        assert_eq!(e.to_string(), "server error ERR_QUEUE_FULL: queue is full");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: GearError = io_err.into();
        assert!(matches!(e, GearError::Io(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn connection_keeps_endpoint() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e = GearError::connection("localhost:4730", io_err);
        assert!(e.to_string().contains("localhost:4730"));
        assert!(e.is_retryable());
    }

    #[test]
    fn from_utf8() {
        let bad = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let e: GearError = bad.into();
        assert!(matches!(e, GearError::MalformedPacket(_)));
        assert!(!e.is_retryable());
    }
}
