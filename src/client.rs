// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Line protocol client
//!
//! [`LineClient`] owns either a TCP socket to gpsd or a file handle for
//! offline replay, and turns the byte stream into decoded [`Record`]s one
//! line at a time. "Is a line ready" ([`LineClient::waiting`]) is kept
//! separate from "read more bytes" ([`LineClient::read_record`]) so callers
//! can drive the client from their own poll loop.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::{ConfigError, Result, TransportError};
use crate::line::{LineBuffer, DEFAULT_READ_SIZE};
use crate::record::Record;

/// Well-known gpsd TCP port
pub const GPSD_PORT: u16 = 2947;

/// Default gpsd host
pub const DEFAULT_HOST: &str = "localhost";

/// Where the stream comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Live gpsd over TCP
    Tcp { host: String, port: u16 },
    /// Recorded stream, one JSON report per line
    File(PathBuf),
}

impl Endpoint {
    /// Build a TCP endpoint
    ///
    /// Without an explicit port, a single `host:port` suffix is split off and
    /// the part after the colon must be numeric. Hosts with several colons
    /// (IPv6 literals) are taken as-is and use the default port.
    pub fn tcp(host: &str, port: Option<u16>) -> std::result::Result<Self, ConfigError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if let Some(port) = port {
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }

        match (host.find(':'), host.rfind(':')) {
            (Some(first), Some(last)) if first == last => {
                let (name, suffix) = (&host[..last], &host[last + 1..]);
                let port = suffix
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(host.to_string()))?;
                if name.is_empty() {
                    return Err(ConfigError::EmptyHost);
                }
                Ok(Self::Tcp {
                    host: name.to_string(),
                    port,
                })
            }
            _ => Ok(Self::Tcp {
                host: host.to_string(),
                port: GPSD_PORT,
            }),
        }
    }

    /// Build a replay endpoint
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: GPSD_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Result of one [`LineClient::read_record`] call
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A complete line was decoded
    Record(Record),
    /// No complete line yet; the partial data stays buffered
    Partial,
    /// The peer closed the stream or the file ended
    Eof,
}

/// Something that yields records over a connection that can be re-established
///
/// Implemented by [`LineClient`]; the reconnect supervisor only talks to
/// this trait.
pub trait RecordSource {
    /// Open (or reopen) the transport
    fn connect(&mut self) -> Result<()>;

    /// Pull at most one record
    fn read_record(&mut self) -> Result<ReadOutcome>;

    /// Send a command, or queue it until the next connect
    fn send(&mut self, command: &str) -> Result<()>;

    /// Release the transport
    fn close(&mut self);

    /// Whether a transport is open
    fn is_connected(&self) -> bool;

    /// Human readable description of the endpoint
    fn describe(&self) -> String;
}

/// Client settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on each TCP connect attempt
    pub connect_timeout: Duration,
    /// Bound on each blocking socket read; `None` blocks indefinitely
    pub read_timeout: Option<Duration>,
    /// Bytes requested per transport read
    pub read_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(1)),
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

#[derive(Debug)]
enum Transport {
    Socket(TcpStream),
    File(File),
}

impl Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Socket(s) => s.read(buf),
            Self::File(f) => f.read(buf),
        }
    }
}

/// Buffered gpsd client over a socket or a replay file
#[derive(Debug)]
pub struct LineClient {
    endpoint: Endpoint,
    config: ClientConfig,
    transport: Option<Transport>,
    buffer: LineBuffer,
    chunk: Vec<u8>,
    /// Command to send right after the next successful connect
    pending_command: Option<String>,
    /// Last complete line, terminator stripped
    response: String,
    received: Option<Instant>,
}

impl LineClient {
    /// Create a disconnected client
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_config(endpoint, ClientConfig::default())
    }

    /// Create a disconnected client with custom settings
    pub fn with_config(endpoint: Endpoint, config: ClientConfig) -> Self {
        let read_size = config.read_size.max(1);
        Self {
            endpoint,
            config: ClientConfig {
                read_size,
                ..config
            },
            transport: None,
            buffer: LineBuffer::new(),
            chunk: vec![0; read_size],
            pending_command: None,
            response: String::new(),
            received: None,
        }
    }

    /// Endpoint this client connects to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open the transport
    ///
    /// Any previously open transport is closed first. On failure nothing is
    /// left open. A command queued by [`send`](Self::send) while
    /// disconnected is written as soon as the connection is up.
    pub fn connect(&mut self) -> Result<()> {
        self.close();

        let transport = match &self.endpoint {
            Endpoint::Tcp { host, port } => Transport::Socket(self.open_socket(host, *port)?),
            Endpoint::File(path) => {
                let file = File::open(path).map_err(|source| TransportError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
                Transport::File(file)
            }
        };
        self.transport = Some(transport);
        log::info!("connected to {}", self.endpoint);

        if let Some(command) = self.pending_command.take() {
            if let Err(e) = self.write_command(&command) {
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    fn open_socket(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                host: host.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            }
            .into());
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(self.config.read_timeout)?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    log::debug!("connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::Connect {
            endpoint: self.endpoint.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no attempt")),
        }
        .into())
    }

    /// Whether a record can be read without blocking longer than `timeout`
    ///
    /// True when a complete line is already buffered, always true for an
    /// open replay file, and for a socket true once it becomes readable
    /// (including a pending close or error, which the next read reports).
    pub fn waiting(&mut self, timeout: Duration) -> bool {
        if self.buffer.has_line() {
            return true;
        }
        let stream = match &self.transport {
            None => return false,
            Some(Transport::File(_)) => return true,
            Some(Transport::Socket(stream)) => stream,
        };

        let prepared = if timeout.is_zero() {
            stream.set_nonblocking(true)
        } else {
            stream.set_read_timeout(Some(timeout))
        };
        if let Err(e) = prepared {
            log::debug!("cannot poll socket: {}", e);
            return true;
        }

        let mut probe = [0u8; 1];
        let ready = match stream.peek(&mut probe) {
            Ok(_) => true,
            Err(e) => !matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
        };

        let restored = if timeout.is_zero() {
            stream.set_nonblocking(false)
        } else {
            stream.set_read_timeout(self.config.read_timeout)
        };
        if let Err(e) = restored {
            log::debug!("cannot restore socket mode: {}", e);
        }
        ready
    }

    /// Read at most one record
    ///
    /// When no complete line is buffered, one bounded read is issued. A
    /// read that times out, or delivers bytes without a terminator, yields
    /// [`ReadOutcome::Partial`]. A malformed line is consumed and reported
    /// as a decode error; the next call continues with the following line.
    pub fn read_record(&mut self) -> Result<ReadOutcome> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        if !self.buffer.has_line() {
            match transport.read(&mut self.chunk) {
                Ok(0) => {
                    log::debug!("no more data from {}", self.endpoint);
                    return Ok(ReadOutcome::Eof);
                }
                Ok(n) => self.buffer.extend(&self.chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    return Ok(ReadOutcome::Partial);
                }
                Err(e) => return Err(TransportError::Io(e).into()),
            }
        }

        let Some(bytes) = self.buffer.next_line() else {
            log::trace!("partial message, {} bytes buffered", self.buffer.pending());
            return Ok(ReadOutcome::Partial);
        };

        self.received = Some(Instant::now());
        self.response = String::from_utf8_lossy(&bytes).trim_end().to_string();
        log::trace!("data is {}", self.response);

        let record = Record::decode(&self.response)?;
        Ok(ReadOutcome::Record(record))
    }

    /// Send a command to the daemon
    ///
    /// A newline is appended when missing. While disconnected the command
    /// is kept (replacing any earlier one) and sent right after the next
    /// successful connect. Replay files accept no commands.
    pub fn send(&mut self, command: &str) -> Result<()> {
        let mut command = command.to_string();
        if !command.ends_with('\n') {
            command.push('\n');
        }

        if self.transport.is_none() {
            self.pending_command = Some(command);
            return Ok(());
        }
        self.write_command(&command)
    }

    fn write_command(&mut self, command: &str) -> Result<()> {
        match &mut self.transport {
            Some(Transport::Socket(stream)) => {
                stream.write_all(command.as_bytes())?;
                stream.flush()?;
                log::debug!("sent {}", command.trim_end());
                Ok(())
            }
            Some(Transport::File(_)) => {
                log::debug!("replay input, not sending {}", command.trim_end());
                Ok(())
            }
            None => Err(TransportError::NotConnected.into()),
        }
    }

    /// Release the transport and drop buffered bytes
    ///
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if let Some(Transport::Socket(stream)) = self.transport.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.buffer.clear();
    }

    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Command waiting for the next connect
    pub fn pending_command(&self) -> Option<&str> {
        self.pending_command.as_deref()
    }

    /// Last complete line received
    pub fn response(&self) -> &str {
        &self.response
    }

    /// When the last complete line arrived
    pub fn last_activity(&self) -> Option<Instant> {
        self.received
    }

    /// Bytes buffered without a terminator yet
    pub fn buffered(&self) -> usize {
        self.buffer.pending()
    }
}

impl Drop for LineClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl RecordSource for LineClient {
    fn connect(&mut self) -> Result<()> {
        LineClient::connect(self)
    }

    fn read_record(&mut self) -> Result<ReadOutcome> {
        LineClient::read_record(self)
    }

    fn send(&mut self, command: &str) -> Result<()> {
        LineClient::send(self, command)
    }

    fn close(&mut self) {
        LineClient::close(self)
    }

    fn is_connected(&self) -> bool {
        LineClient::is_connected(self)
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpsdError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn replay(contents: &[u8], read_size: usize) -> (NamedTempFile, LineClient) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        let client = LineClient::with_config(
            Endpoint::file(file.path()),
            ClientConfig {
                read_size,
                ..Default::default()
            },
        );
        (file, client)
    }

    #[test]
    fn test_endpoint_explicit_port() {
        assert_eq!(
            Endpoint::tcp("gps.local", Some(3000)).unwrap(),
            Endpoint::Tcp {
                host: "gps.local".to_string(),
                port: 3000
            }
        );
    }

    #[test]
    fn test_endpoint_shorthand() {
        assert_eq!(
            Endpoint::tcp("10.0.0.7:2948", None).unwrap(),
            Endpoint::Tcp {
                host: "10.0.0.7".to_string(),
                port: 2948
            }
        );
        assert_eq!(
            Endpoint::tcp("localhost", None).unwrap(),
            Endpoint::default()
        );
    }

    #[test]
    fn test_endpoint_nonnumeric_port() {
        assert_eq!(
            Endpoint::tcp("gps:http", None),
            Err(ConfigError::InvalidPort("gps:http".to_string()))
        );
        assert_eq!(Endpoint::tcp("  ", None), Err(ConfigError::EmptyHost));
        assert_eq!(Endpoint::tcp(":2947", None), Err(ConfigError::EmptyHost));
    }

    #[test]
    fn test_endpoint_ipv6_literal_keeps_default_port() {
        assert_eq!(
            Endpoint::tcp("::1", None).unwrap(),
            Endpoint::Tcp {
                host: "::1".to_string(),
                port: GPSD_PORT
            }
        );
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::default().to_string(), "tcp://localhost:2947");
        assert_eq!(
            Endpoint::file("/tmp/gps.log").to_string(),
            "file:///tmp/gps.log"
        );
    }

    #[test]
    fn test_read_before_connect() {
        let mut client = LineClient::new(Endpoint::file("/nonexistent"));
        let err = client.read_record().unwrap_err();
        assert!(matches!(
            err,
            GpsdError::Transport(TransportError::NotConnected)
        ));
        assert!(!client.waiting(Duration::ZERO));
    }

    #[test]
    fn test_connect_missing_file() {
        let mut client = LineClient::new(Endpoint::file("/nonexistent/gpsd.json"));
        let err = client.connect().unwrap_err();
        assert!(matches!(
            err,
            GpsdError::Transport(TransportError::Open { .. })
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_replay_records_then_eof() {
        let (_file, mut client) = replay(
            b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\n{\"class\":\"WATCH\"}\n",
            DEFAULT_READ_SIZE,
        );
        client.connect().unwrap();
        assert!(client.waiting(Duration::ZERO));

        let first = client.read_record().unwrap();
        match first {
            ReadOutcome::Record(r) => assert_eq!(r.str("release"), Some("3.25")),
            other => panic!("unexpected {:?}", other),
        }
        // Second line is already buffered, no read needed
        assert!(matches!(client.read_record().unwrap(), ReadOutcome::Record(_)));
        assert_eq!(client.response(), "{\"class\":\"WATCH\"}");
        assert_eq!(client.read_record().unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_small_reads_report_partial() {
        let (_file, mut client) = replay(b"{\"class\":\"WATCH\"}\n", 4);
        client.connect().unwrap();

        let mut partials = 0;
        let record = loop {
            match client.read_record().unwrap() {
                ReadOutcome::Partial => partials += 1,
                ReadOutcome::Record(r) => break r,
                ReadOutcome::Eof => panic!("premature eof"),
            }
        };
        assert_eq!(record.class_name(), Some("WATCH"));
        assert!(partials >= 4);
        assert!(client.last_activity().is_some());
    }

    #[test]
    fn test_malformed_line_does_not_stop_stream() {
        let (_file, mut client) = replay(b"{\"class\":\n{\"class\":\"TPV\"}\n", 64);
        client.connect().unwrap();

        let err = client.read_record().unwrap_err();
        match err {
            GpsdError::Decode(e) => assert_eq!(e.raw, "{\"class\":"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(client.read_record().unwrap(), ReadOutcome::Record(_)));
    }

    #[test]
    fn test_send_before_connect_is_queued() {
        let (_file, mut client) = replay(b"", 64);
        client.send("?WATCH={\"enable\":true}").unwrap();
        assert_eq!(client.pending_command(), Some("?WATCH={\"enable\":true}\n"));

        client.connect().unwrap();
        assert_eq!(client.pending_command(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_file, mut client) = replay(b"{\"a\":", 64);
        client.connect().unwrap();
        assert_eq!(client.read_record().unwrap(), ReadOutcome::Partial);
        assert_eq!(client.buffered(), 5);

        client.close();
        client.close();
        assert!(!client.is_connected());
        assert_eq!(client.buffered(), 0);
    }

    #[test]
    fn test_reconnect_rewinds_replay() {
        let (_file, mut client) = replay(b"{\"class\":\"SKY\"}\n", 64);
        client.connect().unwrap();
        assert!(matches!(client.read_record().unwrap(), ReadOutcome::Record(_)));
        assert_eq!(client.read_record().unwrap(), ReadOutcome::Eof);

        client.connect().unwrap();
        assert!(matches!(client.read_record().unwrap(), ReadOutcome::Record(_)));
    }
}
