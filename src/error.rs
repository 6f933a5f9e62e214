// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for gpsd-stream
//!
//! Every failure is classified by [`ErrorKind`] so that callers can decide
//! between "retry the connection", "skip and continue" and "abort startup"
//! without inspecting concrete error types.

use std::io;
use thiserror::Error;

/// Result type alias for gpsd-stream operations
pub type Result<T> = std::result::Result<T, GpsdError>;

/// Coarse classification used by the reconnect supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or I/O failure; recovered by backoff and reconnect
    Transport,
    /// Malformed line; the line is dropped, the stream continues
    Decode,
    /// Expected field absent; the sub-item is skipped
    Field,
    /// Unusable configuration; fatal at startup only
    Configuration,
}

impl ErrorKind {
    /// Whether the current connection must be abandoned
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport)
    }

    /// Whether processing can continue on the same connection
    pub fn is_recoverable_in_place(&self) -> bool {
        matches!(self, Self::Decode | Self::Field)
    }
}

/// Main error type for gpsd-stream operations
#[derive(Error, Debug)]
pub enum GpsdError {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Field error
    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GpsdError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Field(_) => ErrorKind::Field,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

impl From<io::Error> for GpsdError {
    fn from(err: io::Error) -> Self {
        Self::Transport(TransportError::Io(err))
    }
}

/// Errors on the socket or file transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host name did not resolve to any address
    #[error("Cannot resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Every resolved address refused or timed out
    #[error("Cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Replay file could not be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an open transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation needs an open transport
    #[error("Not connected")]
    NotConnected,
}

/// Malformed JSON line
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{explanation} (in {raw:?})")]
pub struct DecodeError {
    /// The offending line, without the trailing newline
    pub raw: String,
    /// Parser diagnostic
    pub explanation: String,
}

impl DecodeError {
    /// Create a decode error for a raw line
    pub fn new(raw: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            explanation: explanation.into(),
        }
    }
}

/// Field-level errors inside a decoded record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Required field is absent
    #[error("Missing field '{field}' in {class} record")]
    Missing { class: String, field: String },

    /// Field is present but has an unexpected JSON type
    #[error("Field '{field}' in {class} record is not {expected}")]
    WrongType {
        class: String,
        field: String,
        expected: &'static str,
    },
}

/// Startup configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Port suffix could not be parsed
    #[error("Nonnumeric port in '{0}'")]
    InvalidPort(String),

    /// Host is empty
    #[error("Empty host name")]
    EmptyHost,

    /// Any other invalid setting
    #[error("Invalid setting: {0}")]
    Invalid(String),
}
