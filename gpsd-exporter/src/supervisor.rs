// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reconnect supervisor.
//!
//! Drives `connect -> stream -> backoff -> connect ..` on a single blocking
//! worker until shutdown is requested. Transport failures never end the
//! loop; decode and field errors do not even end the connection.
//!
//! ```text
//! Disconnected -> Connecting -> Streaming
//!                    ^   |          |
//!                    |   v          v
//!                    +-- Backoff <--+        (any) -> ShuttingDown
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use gpsd_stream::{Backoff, BackoffConfig, ErrorKind, GpsdError, ReadOutcome, RecordSource};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::RecordDispatcher;

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SupervisorState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    Backoff = 3,
    ShuttingDown = 4,
}

impl SupervisorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Backoff,
            4 => Self::ShuttingDown,
            _ => Self::Disconnected,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Backoff => "backoff",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Cancellation flag that also wakes sleepers
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    /// Create an untriggered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    /// Whether shutdown was requested
    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`; returns true as soon as shutdown is requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Counters readable from the HTTP handlers while the worker runs
#[derive(Debug, Default)]
pub struct SupervisorStatus {
    state: AtomicU8,
    attempts: AtomicU64,
    records: AtomicU64,
    decode_errors: AtomicU64,
    delay_ms: AtomicU64,
}

impl SupervisorStatus {
    /// Current state
    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether records are flowing
    pub fn is_streaming(&self) -> bool {
        self.state() == SupervisorState::Streaming
    }

    /// Connection attempts since start
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Records received since start
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::SeqCst)
    }

    /// Lines that failed to decode since start
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::SeqCst)
    }

    /// Delay the next failure waits
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// What one [`Supervisor::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Connected and sent the WATCH command
    Connected,
    /// Connect attempt failed
    ConnectFailed,
    /// A record was dispatched
    Record,
    /// Nothing complete to read yet
    Idle,
    /// A line or record was skipped, connection kept
    Skipped,
    /// Connection lost
    Disconnected,
    /// Waited before reconnecting
    Slept(Duration),
    /// Shutdown requested
    Stopped,
}

type ConnectHook = Box<dyn FnOnce() + Send>;

/// Keeps a [`RecordSource`] streaming into a [`RecordDispatcher`]
pub struct Supervisor<S: RecordSource> {
    source: S,
    dispatcher: RecordDispatcher,
    backoff: Backoff,
    watch: String,
    state: SupervisorState,
    awaiting_first_record: bool,
    status: Arc<SupervisorStatus>,
    shutdown: Shutdown,
    on_first_connect: Option<ConnectHook>,
}

impl<S: RecordSource> Supervisor<S> {
    /// Create a supervisor; nothing happens until [`run`](Self::run)
    pub fn new(
        source: S,
        dispatcher: RecordDispatcher,
        backoff: BackoffConfig,
        watch: impl Into<String>,
        shutdown: Shutdown,
    ) -> Self {
        let backoff = Backoff::new(backoff);
        let status = Arc::new(SupervisorStatus::default());
        status
            .delay_ms
            .store(backoff.current_delay().as_millis() as u64, Ordering::SeqCst);
        Self {
            source,
            dispatcher,
            backoff,
            watch: watch.into(),
            state: SupervisorState::Disconnected,
            awaiting_first_record: false,
            status,
            shutdown,
            on_first_connect: None,
        }
    }

    /// Run `hook` once, after the first successful connect
    pub fn on_first_connect(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_first_connect = Some(Box::new(hook));
        self
    }

    /// Shared status handle
    pub fn status(&self) -> Arc<SupervisorStatus> {
        Arc::clone(&self.status)
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Underlying source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Loop until shutdown
    pub fn run(&mut self) {
        info!(endpoint = %self.source.describe(), "supervisor started");
        while self.step() != Step::Stopped {}
        info!("supervisor stopped");
    }

    /// Advance the state machine by one action
    pub fn step(&mut self) -> Step {
        if self.shutdown.is_triggered() {
            return self.stop();
        }
        match self.state {
            SupervisorState::Disconnected | SupervisorState::Connecting => self.connect(),
            SupervisorState::Streaming => self.read(),
            SupervisorState::Backoff => self.sleep(),
            SupervisorState::ShuttingDown => Step::Stopped,
        }
    }

    fn set_state(&mut self, state: SupervisorState) {
        self.state = state;
        self.status.set_state(state);
    }

    fn connect(&mut self) -> Step {
        self.set_state(SupervisorState::Connecting);
        let attempt = self.status.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatcher.metrics().connection_attempts_total.inc();

        let result = self
            .source
            .connect()
            .and_then(|()| self.source.send(&self.watch));
        if let Err(e) = result {
            self.source.close();
            warn!(
                attempt,
                delay = ?self.backoff.current_delay(),
                error = %e,
                "cannot connect to gpsd"
            );
            self.set_state(SupervisorState::Backoff);
            return Step::ConnectFailed;
        }

        info!(attempt, endpoint = %self.source.describe(), "streaming from gpsd");
        if let Some(hook) = self.on_first_connect.take() {
            hook();
        }
        self.awaiting_first_record = true;
        self.dispatcher.metrics().connected.set(1);
        self.set_state(SupervisorState::Streaming);
        Step::Connected
    }

    fn read(&mut self) -> Step {
        match self.source.read_record() {
            Ok(ReadOutcome::Record(record)) => {
                if self.awaiting_first_record {
                    self.awaiting_first_record = false;
                    self.backoff.reset();
                    self.publish_delay();
                }
                self.status.records.fetch_add(1, Ordering::SeqCst);
                match self.dispatcher.handle(&record) {
                    Ok(()) => Step::Record,
                    Err(e) if e.kind() == ErrorKind::Transport => {
                        warn!(error = %e, "dispatch failed");
                        self.disconnect()
                    }
                    Err(e) => {
                        debug!(error = %e, "record skipped");
                        Step::Skipped
                    }
                }
            }
            Ok(ReadOutcome::Partial) => Step::Idle,
            Ok(ReadOutcome::Eof) => {
                info!(endpoint = %self.source.describe(), "gpsd closed the stream");
                self.disconnect()
            }
            Err(e) => self.read_failed(e),
        }
    }

    fn read_failed(&mut self, e: GpsdError) -> Step {
        match e.kind() {
            ErrorKind::Decode => {
                self.status.decode_errors.fetch_add(1, Ordering::SeqCst);
                self.dispatcher.metrics().decode_errors_total.inc();
                debug!(error = %e, "line skipped");
                Step::Skipped
            }
            ErrorKind::Field => {
                debug!(error = %e, "record skipped");
                Step::Skipped
            }
            ErrorKind::Transport | ErrorKind::Configuration => {
                warn!(error = %e, "connection to gpsd lost");
                self.disconnect()
            }
        }
    }

    fn disconnect(&mut self) -> Step {
        self.source.close();
        self.dispatcher.metrics().connected.set(0);
        self.set_state(SupervisorState::Backoff);
        Step::Disconnected
    }

    fn sleep(&mut self) -> Step {
        let delay = self.backoff.next_delay();
        self.publish_delay();
        info!(
            failures = self.backoff.failures(),
            "reconnecting in {:?}", delay
        );
        if self.shutdown.wait_timeout(delay) {
            return self.stop();
        }
        self.set_state(SupervisorState::Connecting);
        Step::Slept(delay)
    }

    fn stop(&mut self) -> Step {
        if self.state != SupervisorState::ShuttingDown {
            self.source.close();
            self.dispatcher.metrics().connected.set(0);
            self.set_state(SupervisorState::ShuttingDown);
        }
        Step::Stopped
    }

    fn publish_delay(&self) {
        self.status.delay_ms.store(
            self.backoff.current_delay().as_millis() as u64,
            Ordering::SeqCst,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::metrics::ExporterMetrics;
    use crate::queue::ObservationQueue;
    use gpsd_stream::{ClientConfig, Endpoint, LineClient, Record, TransportError, WatchOptions};
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    enum Read {
        Line(&'static str),
        Partial,
        Eof,
        Fail,
    }

    #[derive(Default)]
    struct FakeSource {
        connects: VecDeque<bool>,
        reads: VecDeque<Read>,
        sent: Vec<String>,
        connected: bool,
        closes: usize,
    }

    impl RecordSource for FakeSource {
        fn connect(&mut self) -> gpsd_stream::Result<()> {
            if self.connects.pop_front().unwrap_or(false) {
                self.connected = true;
                Ok(())
            } else {
                Err(TransportError::NotConnected.into())
            }
        }

        fn read_record(&mut self) -> gpsd_stream::Result<ReadOutcome> {
            match self.reads.pop_front() {
                Some(Read::Line(line)) => Ok(ReadOutcome::Record(Record::decode(line)?)),
                Some(Read::Partial) => Ok(ReadOutcome::Partial),
                Some(Read::Fail) => Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into()),
                Some(Read::Eof) | None => Ok(ReadOutcome::Eof),
            }
        }

        fn send(&mut self, command: &str) -> gpsd_stream::Result<()> {
            self.sent.push(command.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.connected = false;
            self.closes += 1;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn dispatcher() -> (RecordDispatcher, Arc<ObservationQueue>) {
        let config = ExporterConfig::default();
        let metrics = Arc::new(ExporterMetrics::new(&config).unwrap());
        let queue = Arc::new(ObservationQueue::new(config.queue_size));
        (
            RecordDispatcher::new(&config, metrics, Some(Arc::clone(&queue))),
            queue,
        )
    }

    fn supervisor(source: FakeSource) -> Supervisor<FakeSource> {
        let (dispatcher, _) = dispatcher();
        Supervisor::new(
            source,
            dispatcher,
            BackoffConfig::new(ms(10), ms(300)),
            "?WATCH={\"enable\":true}",
            Shutdown::new(),
        )
    }

    #[test]
    fn test_backoff_doubles_then_resets() {
        let source = FakeSource {
            connects: VecDeque::from(vec![false, false, false, true, false]),
            reads: VecDeque::from(vec![Read::Line(r#"{"class":"WATCH"}"#), Read::Eof]),
            ..Default::default()
        };
        let mut sup = supervisor(source);

        let mut delays = Vec::new();
        for _ in 0..3 {
            assert_eq!(sup.step(), Step::ConnectFailed);
            match sup.step() {
                Step::Slept(d) => delays.push(d),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(delays, vec![ms(10), ms(20), ms(40)]);

        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.state(), SupervisorState::Streaming);
        assert_eq!(sup.step(), Step::Record);
        assert_eq!(sup.step(), Step::Disconnected);
        assert_eq!(sup.step(), Step::Slept(ms(10)));
        assert_eq!(sup.status().attempts(), 4);
    }

    #[test]
    fn test_connect_without_record_keeps_backoff() {
        let source = FakeSource {
            connects: VecDeque::from(vec![false, true]),
            reads: VecDeque::from(vec![Read::Eof]),
            ..Default::default()
        };
        let mut sup = supervisor(source);
        assert_eq!(sup.step(), Step::ConnectFailed);
        assert_eq!(sup.step(), Step::Slept(ms(10)));
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.step(), Step::Disconnected);
        assert_eq!(sup.step(), Step::Slept(ms(20)));
    }

    #[test]
    fn test_watch_sent_on_every_connect() {
        let source = FakeSource {
            connects: VecDeque::from(vec![true, true]),
            reads: VecDeque::from(vec![Read::Eof]),
            ..Default::default()
        };
        let mut sup = supervisor(source);
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.step(), Step::Disconnected);
        assert!(matches!(sup.step(), Step::Slept(_)));
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.source().sent.len(), 2);
        assert!(sup.source().sent[0].starts_with("?WATCH="));
    }

    #[test]
    fn test_decode_error_keeps_streaming() {
        let source = FakeSource {
            connects: VecDeque::from(vec![true]),
            reads: VecDeque::from(vec![
                Read::Line("{\"class\":\"TPV\",\"lat\":"),
                Read::Partial,
                Read::Line(r#"{"class":"TPV","lat":52.0}"#),
            ]),
            ..Default::default()
        };
        let mut sup = supervisor(source);
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.step(), Step::Skipped);
        assert_eq!(sup.state(), SupervisorState::Streaming);
        assert_eq!(sup.step(), Step::Idle);
        assert_eq!(sup.step(), Step::Record);
        assert_eq!(sup.status().decode_errors(), 1);
        assert_eq!(sup.status().records(), 1);
    }

    #[test]
    fn test_transport_error_moves_to_backoff() {
        let source = FakeSource {
            connects: VecDeque::from(vec![true]),
            reads: VecDeque::from(vec![Read::Fail]),
            ..Default::default()
        };
        let mut sup = supervisor(source);
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.step(), Step::Disconnected);
        assert_eq!(sup.state(), SupervisorState::Backoff);
        assert!(!sup.source().is_connected());
    }

    #[test]
    fn test_first_connect_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            connects: VecDeque::from(vec![true, true]),
            reads: VecDeque::from(vec![Read::Eof]),
            ..Default::default()
        };
        let counter = Arc::clone(&calls);
        let mut sup = supervisor(source).on_first_connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(sup.step(), Step::Disconnected);
        assert!(matches!(sup.step(), Step::Slept(_)));
        assert_eq!(sup.step(), Step::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_interrupts_backoff() {
        let (dispatcher, _) = dispatcher();
        let shutdown = Shutdown::new();
        let mut sup = Supervisor::new(
            FakeSource::default(),
            dispatcher,
            BackoffConfig::new(Duration::from_secs(60), Duration::from_secs(300)),
            "?WATCH={}",
            shutdown.clone(),
        );

        let trigger = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(ms(50));
                shutdown.trigger();
            })
        };

        let start = Instant::now();
        sup.run();
        trigger.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(sup.state(), SupervisorState::ShuttingDown);
        assert_eq!(sup.step(), Step::Stopped);
    }

    #[test]
    fn test_streams_from_fake_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let daemon = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut watch = String::new();
            reader.read_line(&mut watch).unwrap();

            let mut stream = stream;
            stream
                .write_all(
                    b"{\"class\":\"VERSION\",\"release\":\"3.25\",\"rev\":\"3.25\",\"proto_major\":3,\"proto_minor\":15}\n\
                      {\"class\":\"SKY\",\"satellites\":[{\"PRN\":4,\"ss\":33,\"used\":true},{\"PRN\":9,\"ss\":21}]}\n\
                      {\"class\":\"TPV\",\"mode\":3,\"lat\":52.1,\"lon\":4.3}\n",
                )
                .unwrap();
            watch
        });

        let (dispatcher, queue) = dispatcher();
        let metrics = Arc::clone(dispatcher.metrics());
        let client = LineClient::with_config(
            Endpoint::tcp("127.0.0.1", Some(port)).unwrap(),
            ClientConfig {
                read_timeout: Some(ms(100)),
                ..Default::default()
            },
        );
        let shutdown = Shutdown::new();
        let mut sup = Supervisor::new(
            client,
            dispatcher,
            BackoffConfig::new(ms(50), ms(200)),
            WatchOptions::exporter().command(),
            shutdown.clone(),
        );
        let status = sup.status();
        let worker = thread::spawn(move || sup.run());

        let deadline = Instant::now() + Duration::from_secs(10);
        while status.records() < 3 && Instant::now() < deadline {
            thread::sleep(ms(10));
        }
        shutdown.trigger();
        worker.join().unwrap();

        let watch = daemon.join().unwrap();
        assert_eq!(watch, format!("{}\n", WatchOptions::exporter().command()));
        assert_eq!(status.records(), 3);
        assert_eq!(status.state(), SupervisorState::ShuttingDown);
        assert_eq!(metrics.sat_seen.get(), 2.0);
        assert_eq!(metrics.sat_used.get(), 1.0);
        assert_eq!(queue.len(), 2);
        assert_eq!(metrics.connected.get(), 0);
    }
}
