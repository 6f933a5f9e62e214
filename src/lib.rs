// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # gpsd-stream
//!
//! A client for the line-delimited JSON stream of the gpsd positioning
//! daemon, built to run unattended for months.
//!
//! ## Key Features
//!
//! - **Partial reads**: records of any size are reassembled across reads
//! - **Typed records**: optional-field accessors, no panics on absent data
//! - **Error taxonomy**: every failure says whether to reconnect, skip or stop
//! - **Backoff**: capped exponential reconnect delays
//!
//! ## Quick Start
//!
//! ```no_run
//! use gpsd_stream::{Endpoint, LineClient, ReadOutcome, WatchOptions};
//!
//! let mut client = LineClient::new(Endpoint::tcp("localhost", None)?);
//! client.send(&WatchOptions::exporter().command())?;
//! client.connect()?;
//!
//! loop {
//!     match client.read_record() {
//!         Ok(ReadOutcome::Record(record)) => println!("{}", record),
//!         Ok(ReadOutcome::Partial) => continue,
//!         Ok(ReadOutcome::Eof) => break,
//!         Err(e) if e.kind().is_recoverable_in_place() => eprintln!("{}", e),
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Modules
//!
//! - [`client`]: transport, buffering and the [`RecordSource`] seam
//! - [`record`]: decoded reports
//! - [`line`]: newline framing
//! - [`watch`]: `?WATCH` command generation
//! - [`recovery`]: reconnect backoff
//! - [`geodesy`]: distance functions for offset tracking

pub mod client;
pub mod error;
pub mod geodesy;
pub mod line;
pub mod record;
pub mod recovery;
pub mod watch;

// Re-exports for convenient access
pub use client::{ClientConfig, Endpoint, LineClient, ReadOutcome, RecordSource, GPSD_PORT};
pub use error::{ConfigError, DecodeError, ErrorKind, FieldError, GpsdError, Result, TransportError};
pub use geodesy::{earth_distance, earth_distance_small, meter_offset, DistanceFn};
pub use line::LineBuffer;
pub use record::{Record, RecordClass};
pub use recovery::{Backoff, BackoffConfig};
pub use watch::{RawMode, WatchOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nanoseconds per second
pub const NSEC_PER_SEC: i64 = 1_000_000_000;
