//! Error types shared by the codec, broker, transport and link layers.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Stable machine-readable error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No session is open.
    #[serde(rename = "E_NOT_CONNECTED")]
    NotConnected,
    /// The session went away while the request was outstanding.
    #[serde(rename = "E_SESSION_CLOSED")]
    SessionClosed,
    /// The brick answered with an error status.
    #[serde(rename = "E_FIRMWARE")]
    Firmware,
    /// No answer in time.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// Framing, decoding or request validation failed.
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    /// The session stream failed.
    #[serde(rename = "E_IO")]
    Io,
    /// Invalid configuration.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// Replaced by a newer condition.
    #[serde(rename = "E_SUPERSEDED")]
    Superseded,
}

impl ErrorCode {
    /// Every code, in exit-code order.
    pub const ALL: [ErrorCode; 8] = [
        Self::NotConnected,
        Self::SessionClosed,
        Self::Firmware,
        Self::Timeout,
        Self::Protocol,
        Self::Io,
        Self::Config,
        Self::Superseded,
    ];

    /// Wire form, e.g. `E_TIMEOUT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::SessionClosed => "E_SESSION_CLOSED",
            Self::Firmware => "E_FIRMWARE",
            Self::Timeout => "E_TIMEOUT",
            Self::Protocol => "E_PROTOCOL",
            Self::Io => "E_IO",
            Self::Config => "E_CONFIG",
            Self::Superseded => "E_SUPERSEDED",
        }
    }

    /// Inverse of [`ErrorCode::as_str`].
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Process exit code the CLI uses for this error.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::Io => 3,
            Self::NotConnected => 4,
            Self::SessionClosed => 5,
            Self::Timeout => 6,
            Self::Firmware => 7,
            Self::Protocol => 8,
            Self::Superseded => 9,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error envelope, as carried in driver responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// One of the [`ErrorCode`] strings.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details, when the error has any.
    pub context: Option<Value>,
}

/// Framing, correlation and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ProtocolError {
    /// Reply payload ran out before the operation was decoded.
    #[error("{operation} reply needs {expected} bytes, got {actual}")]
    #[diagnostic(code(brickdrive::protocol::short_payload))]
    ShortPayload {
        /// Operation being decoded.
        operation: &'static str,
        /// Bytes it needs.
        expected: usize,
        /// Bytes left in the payload.
        actual: usize,
    },

    /// Connection byte outside the known table.
    #[error("unknown connection type byte 0x{byte:02x} for port {port}")]
    #[diagnostic(code(brickdrive::protocol::unknown_connection_type))]
    UnknownConnectionType {
        /// Port input value.
        port: u8,
        /// Byte the firmware sent.
        byte: u8,
    },

    /// Frame that does not parse.
    #[error("malformed reply frame: {reason}")]
    #[diagnostic(code(brickdrive::protocol::malformed_frame))]
    MalformedFrame {
        /// What was wrong with it.
        reason: String,
    },

    /// Sequence number wrapped onto an unconsumed reply.
    #[error("sequence {sequence} is still awaiting a reply")]
    #[diagnostic(
        code(brickdrive::protocol::sequence_collision),
        help("the sequence range wrapped before an earlier reply was consumed")
    )]
    SequenceCollision {
        /// The colliding sequence number.
        sequence: u16,
    },

    /// Reply for a sequence other than the one in flight.
    #[error("reply for sequence {actual} while expecting {expected}")]
    #[diagnostic(code(brickdrive::protocol::unexpected_sequence))]
    UnexpectedSequence {
        /// Sequence the link was waiting for.
        expected: u16,
        /// Sequence that arrived.
        actual: u16,
    },

    /// Message too large for the 16-bit length prefix.
    #[error("message of {len} bytes does not fit a frame")]
    #[diagnostic(code(brickdrive::protocol::oversized))]
    Oversized {
        /// Size that did not fit.
        len: usize,
    },

    /// Operand bytes that do not decode.
    #[error("cannot decode operand: {reason}")]
    #[diagnostic(code(brickdrive::protocol::operand))]
    Operand {
        /// What could not be decoded.
        reason: String,
    },
}

/// Outcome of a submission as seen by the caller.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum LinkError {
    /// No session is open.
    #[error("no brick session is connected")]
    #[diagnostic(code(brickdrive::link::not_connected))]
    NotConnected,

    /// The session went away while the request was outstanding.
    #[error("the brick session closed before the request completed")]
    #[diagnostic(code(brickdrive::link::session_closed))]
    SessionClosed,

    /// The brick answered with an error status.
    #[error("the brick reported a failure for sequence {sequence}")]
    #[diagnostic(code(brickdrive::link::firmware))]
    Firmware {
        /// Sequence of the failed command.
        sequence: u16,
    },

    /// No answer in time.
    #[error("timed out after {ms} ms")]
    #[diagnostic(code(brickdrive::link::timeout))]
    Timeout {
        /// How long the caller waited.
        ms: u64,
    },

    /// Replaced by a newer condition.
    #[error("a newer condition replaced this one before it was fulfilled")]
    #[diagnostic(code(brickdrive::link::superseded))]
    Superseded,

    /// The session stream failed.
    #[error("session i/o failed: {message}")]
    #[diagnostic(code(brickdrive::link::io))]
    Io {
        /// Context and the underlying error.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(brickdrive::link::config))]
    Config {
        /// The first violation found.
        message: String,
    },

    /// Framing or decoding failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),
}

impl LinkError {
    /// [`LinkError::Io`] with `context` prefixed to the error.
    pub fn io(context: &str, err: impl fmt::Display) -> Self {
        Self::Io {
            message: format!("{context}: {err}"),
        }
    }

    /// [`LinkError::Config`] from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotConnected => ErrorCode::NotConnected,
            Self::SessionClosed => ErrorCode::SessionClosed,
            Self::Firmware { .. } => ErrorCode::Firmware,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Superseded => ErrorCode::Superseded,
            Self::Io { .. } => ErrorCode::Io,
            Self::Config { .. } => ErrorCode::Config,
            Self::Protocol(_) => ErrorCode::Protocol,
        }
    }

    /// Serializable envelope for driver responses.
    pub fn to_error_info(&self) -> ErrorInfo {
        let context = match self {
            Self::Firmware { sequence } => Some(serde_json::json!({ "sequence": sequence })),
            Self::Timeout { ms } => Some(serde_json::json!({ "timeout_ms": ms })),
            _ => None,
        };
        ErrorInfo {
            code: self.code().as_str().to_string(),
            message: self.to_string(),
            context,
        }
    }
}

/// Result of a link operation.
pub type LinkResult<T> = Result<T, LinkError>;
