//! Protocol errors

use thiserror::Error;

use crate::parameters::ParameterError;

/// Errors that can occur while talking to a device.
///
/// Every variant that belongs to a single transaction carries the offending
/// command in wire form (without the terminator) and the raw diagnostic text,
/// so callers can log or surface failures without re-parsing anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Failed to open transport '{path}': {reason}")]
    TransportOpen {
        /// Port path as given by the caller
        path: String,
        /// Error reported by the serial driver
        reason: String,
    },

    /// The command contains characters the wire format reserves
    #[error("Cannot encode command '{command}': {reason}")]
    Encoding {
        /// The command as it would have been sent
        command: String,
        /// Which character or field was rejected
        reason: String,
    },

    /// Writing failed or the link reported a fault mid-transaction
    #[error("Transport error during '{command}': {reason}")]
    Transport {
        /// The command in flight
        command: String,
        /// Fault reported by the link
        reason: String,
    },

    /// No matching response arrived in time
    #[error("Timed out after {timeout_ms}ms waiting for a response to '{command}'")]
    Timeout {
        /// The command in flight
        command: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// The device answered `!NACK`
    #[error("Device refused '{command}': {line}")]
    Nack {
        /// The refused command
        command: String,
        /// Raw `!NACK` line
        line: String,
    },

    /// The response checksum did not match its body
    #[error("Checksum mismatch for '{command}': expected {expected}, got '{actual}' in {line:?}")]
    ChecksumMismatch {
        /// The command in flight
        command: String,
        /// Checksum computed locally, 4 hex digits
        expected: String,
        /// Checksum field as received, empty when missing
        actual: String,
        /// Raw response line
        line: String,
    },

    /// The response does not fit the line grammar
    #[error("Malformed response to '{command}': {reason} ({line:?})")]
    MalformedFrame {
        /// The command in flight
        command: String,
        /// What was wrong with the line
        reason: String,
        /// Raw response line
        line: String,
    },

    /// The caller cancelled or dropped the reply
    #[error("Command '{command}' was cancelled")]
    Cancelled {
        /// The cancelled command
        command: String,
    },

    /// The session shut down before the command ran
    #[error("Session closed before '{command}' completed")]
    SessionClosed {
        /// The abandoned command
        command: String,
    },

    /// A parameter value failed validation before sending
    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),

    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Fieldless mirror of [`ProtocolError`] used in transaction states and
/// for quick matching in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ProtocolError::TransportOpen`]
    TransportOpen,
    /// See [`ProtocolError::Encoding`]
    Encoding,
    /// See [`ProtocolError::Transport`]
    Transport,
    /// See [`ProtocolError::Timeout`]
    Timeout,
    /// See [`ProtocolError::Nack`]
    Nack,
    /// See [`ProtocolError::ChecksumMismatch`]
    ChecksumMismatch,
    /// See [`ProtocolError::MalformedFrame`]
    MalformedFrame,
    /// See [`ProtocolError::Cancelled`]
    Cancelled,
    /// See [`ProtocolError::SessionClosed`]
    SessionClosed,
    /// See [`ProtocolError::InvalidParameter`]
    InvalidParameter,
    /// See [`ProtocolError::Config`]
    Config,
}

impl ProtocolError {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::TransportOpen { .. } => ErrorKind::TransportOpen,
            ProtocolError::Encoding { .. } => ErrorKind::Encoding,
            ProtocolError::Transport { .. } => ErrorKind::Transport,
            ProtocolError::Timeout { .. } => ErrorKind::Timeout,
            ProtocolError::Nack { .. } => ErrorKind::Nack,
            ProtocolError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            ProtocolError::MalformedFrame { .. } => ErrorKind::MalformedFrame,
            ProtocolError::Cancelled { .. } => ErrorKind::Cancelled,
            ProtocolError::SessionClosed { .. } => ErrorKind::SessionClosed,
            ProtocolError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            ProtocolError::Config(_) => ErrorKind::Config,
        }
    }

    /// The command this error belongs to, if it is transaction-scoped
    pub fn command(&self) -> Option<&str> {
        match self {
            ProtocolError::Encoding { command, .. }
            | ProtocolError::Transport { command, .. }
            | ProtocolError::Timeout { command, .. }
            | ProtocolError::Nack { command, .. }
            | ProtocolError::ChecksumMismatch { command, .. }
            | ProtocolError::MalformedFrame { command, .. }
            | ProtocolError::Cancelled { command }
            | ProtocolError::SessionClosed { command } => Some(command),
            ProtocolError::TransportOpen { .. }
            | ProtocolError::InvalidParameter(_)
            | ProtocolError::Config(_) => None,
        }
    }
}

/// Reasons a received line does not fit the response grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Nothing but whitespace
    #[error("empty line")]
    Empty,

    /// No `;` between body and checksum
    #[error("missing ';' checksum separator")]
    MissingChecksum,

    /// Nothing before the first `,`
    #[error("empty response kind")]
    EmptyKind,
}
