// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exporter error type

use std::io;

use gpsd_stream::{ConfigError, ErrorKind, GpsdError};
use thiserror::Error;

/// Result alias for exporter operations
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised inside the exporter
#[derive(Error, Debug)]
pub enum ExporterError {
    /// Client or record error
    #[error(transparent)]
    Stream(#[from] GpsdError),

    /// Metric registration, labelling or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Invalid command line
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local I/O failure (listener bind, privileges)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP server failure
    #[error("Server error: {0}")]
    Server(String),
}

impl ExporterError {
    /// Classify this error the same way client errors are classified
    ///
    /// Label cardinality mismatches happen per record and are field-class;
    /// every other metrics failure can only happen at registration.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stream(e) => e.kind(),
            Self::Metrics(prometheus::Error::InconsistentCardinality { .. }) => ErrorKind::Field,
            Self::Metrics(_) => ErrorKind::Configuration,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Transport,
            Self::Server(_) => ErrorKind::Configuration,
        }
    }
}
