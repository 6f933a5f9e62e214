// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # gpsd Exporter
//!
//! Prometheus exporter for gpsd position, satellite and PPS telemetry.
//!
//! ## Usage
//!
//! ```bash
//! # Local gpsd, metrics on :9015
//! gpsd-exporter
//!
//! # Remote gpsd, track drift from a surveyed antenna position
//! gpsd-exporter -H gps.lan:2947 --offset-from-geopoint \
//!     --geopoint-lat 52.3702 --geopoint-lon 4.8952
//!
//! # Replay a recorded stream
//! gpsd-exporter --input-file capture.json --no-drop-privileges
//! ```

mod collector;
mod config;
mod dispatch;
mod error;
mod metrics;
mod privileges;
mod queue;
mod supervisor;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::Parser;
use gpsd_stream::{BackoffConfig, ClientConfig, ConfigError, Endpoint, LineClient};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use collector::SatelliteCollector;
use config::{BucketSpec, ExporterConfig, GeoReference, PpsConfig, EXPORTER_PORT};
use dispatch::RecordDispatcher;
use error::{ExporterError, Result};
use metrics::ExporterMetrics;
use privileges::{drop_privileges, PrivilegeOutcome, UNPRIVILEGED_GROUP, UNPRIVILEGED_USER};
use queue::ObservationQueue;
use supervisor::{Shutdown, Supervisor, SupervisorStatus};

/// gpsd Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// gpsd host name or address, optionally as host:port
    #[arg(short = 'H', long, default_value = "localhost")]
    hostname: String,

    /// gpsd TCP port [default: 2947]
    #[arg(short, long)]
    port: Option<u16>,

    /// Replay a file of gpsd JSON reports instead of connecting
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Port for the metrics HTTP server
    #[arg(short = 'E', long, default_value_t = EXPORTER_PORT)]
    exporter_port: u16,

    /// Connect timeout in seconds
    #[arg(long, default_value = "5")]
    connect_timeout: f64,

    /// Socket read timeout in seconds
    #[arg(long, default_value = "1")]
    read_timeout: f64,

    /// First reconnect delay in seconds
    #[arg(long, default_value = "10")]
    retry_delay: f64,

    /// Longest reconnect delay in seconds
    #[arg(long, default_value = "300")]
    max_retry_delay: f64,

    /// Stop monitoring all satellites individually
    #[arg(short = 'S', long)]
    disable_monitor_satellites: bool,

    /// Satellite samples kept between scrapes
    #[arg(long, default_value = "2000")]
    queue_size: usize,

    /// Track offset (x, y and distance) from a stationary location
    #[arg(long)]
    offset_from_geopoint: bool,

    /// Latitude of the stationary location
    #[arg(long, allow_negative_numbers = true)]
    geopoint_lat: Option<f64>,

    /// Longitude of the stationary location
    #[arg(long, allow_negative_numbers = true)]
    geopoint_lon: Option<f64>,

    /// Geo histogram bucket size in meters
    #[arg(long, default_value = "0.5")]
    geo_bucket_size: f64,

    /// Geo histogram bucket count
    #[arg(long, default_value = "40")]
    geo_bucket_count: u32,

    /// Build a histogram of PPS offsets
    #[arg(long)]
    pps_histogram: bool,

    /// PPS histogram bucket size in nanoseconds
    #[arg(long, default_value = "250")]
    pps_bucket_size: f64,

    /// PPS histogram bucket count
    #[arg(long, default_value = "40")]
    pps_bucket_count: u32,

    /// Local PPS clock offset in seconds (time1 in ntp.conf)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pps_time1: f64,

    /// Keep running as the invoking user even when it is root
    #[arg(long)]
    no_drop_privileges: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> std::result::Result<ExporterConfig, ConfigError> {
        let endpoint = match &self.input_file {
            Some(path) => Endpoint::file(path),
            None => Endpoint::tcp(&self.hostname, self.port)?,
        };

        let config = ExporterConfig {
            endpoint,
            client: ClientConfig {
                connect_timeout: seconds("connect timeout", self.connect_timeout)?,
                read_timeout: Some(seconds("read timeout", self.read_timeout)?),
                ..Default::default()
            },
            backoff: BackoffConfig::new(
                seconds("retry delay", self.retry_delay)?,
                seconds("maximum retry delay", self.max_retry_delay)?,
            ),
            exporter_port: self.exporter_port,
            monitor_satellites: !self.disable_monitor_satellites,
            queue_size: self.queue_size,
            geo: GeoReference::from_options(
                self.offset_from_geopoint,
                self.geopoint_lat,
                self.geopoint_lon,
                BucketSpec::new(self.geo_bucket_size, self.geo_bucket_count),
            )?,
            pps: self.pps_histogram.then(|| PpsConfig {
                buckets: BucketSpec::new(self.pps_bucket_size, self.pps_bucket_count),
                time1: self.pps_time1,
            }),
            drop_privileges: !self.no_drop_privileges,
        };
        config.validate()?;
        Ok(config)
    }
}

fn seconds(name: &str, value: f64) -> std::result::Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::Invalid(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        ))
    })
}

/// Application state shared across handlers.
struct AppState {
    metrics: Arc<ExporterMetrics>,
    queue: Arc<ObservationQueue>,
    status: Arc<SupervisorStatus>,
    endpoint: String,
    start_time: Instant,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gpsd Exporter v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            match e {
                ExporterError::Config(_) | ExporterError::Metrics(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn serve(config: ExporterConfig) -> Result<()> {
    let metrics = Arc::new(ExporterMetrics::new(&config)?);
    let queue = Arc::new(ObservationQueue::new(config.queue_size));
    if config.monitor_satellites {
        metrics.register_collector(Box::new(SatelliteCollector::new(Arc::clone(&queue))?))?;
    }

    // Bind before connecting so a busy port fails fast
    let addr = SocketAddr::from(([0, 0, 0, 0], config.exporter_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let dispatcher = RecordDispatcher::new(
        &config,
        Arc::clone(&metrics),
        config.monitor_satellites.then(|| Arc::clone(&queue)),
    );
    let client = LineClient::with_config(config.endpoint.clone(), config.client);
    let shutdown = Shutdown::new();
    let mut supervisor = Supervisor::new(
        client,
        dispatcher,
        config.backoff,
        config.watch_options().command(),
        shutdown.clone(),
    );
    if config.drop_privileges {
        supervisor = supervisor.on_first_connect(|| {
            match drop_privileges(UNPRIVILEGED_USER, UNPRIVILEGED_GROUP) {
                Ok(PrivilegeOutcome::Dropped { uid, gid }) => {
                    info!(uid, gid, "dropped privileges")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cannot drop privileges"),
            }
        });
    }

    let state = Arc::new(AppState {
        metrics,
        queue,
        status: supervisor.status(),
        endpoint: config.endpoint.to_string(),
        start_time: Instant::now(),
    });

    let worker = tokio::task::spawn_blocking(move || supervisor.run());

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for interrupt");
                std::future::pending::<()>().await;
            }
            info!("interrupt received, shutting down");
            signal.trigger();
        })
        .await;

    // The server may also stop on its own; the worker must follow
    shutdown.trigger();
    if let Err(e) = worker.await {
        warn!(error = %e, "stream worker ended abnormally");
    }
    served.map_err(|e| ExporterError::Server(e.to_string()))
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>gpsd Exporter</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>gpsd Exporter</h1>
    <p>Prometheus exporter for gpsd position, satellite and PPS telemetry.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div><a href="/health">/health</a> - Health check</div>
        <div><a href="/ready">/ready</a> - Readiness check (streaming from gpsd)</div>
        <div><a href="/status">/status</a> - Status information (JSON)</div>
    </div>

    <h2>Metrics</h2>
    <ul>
        <li><code>gpsd_lat</code>, <code>gpsd_long</code>, <code>gpsd_altHAE</code> - Position</li>
        <li><code>gpsd_hdop</code>, <code>gpsd_vdop</code>, ... - Dilution of precision</li>
        <li><code>gpsd_sat_ss</code>, <code>gpsd_sat_el</code>, <code>gpsd_sat_az</code> - Per satellite</li>
        <li><code>gpsd_geo_offset_m_histogram</code> - Offset from a fixed point</li>
        <li><code>gpsd_pps_histogram</code> - PPS offset</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            error!(error = %e, "cannot encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.status.is_streaming() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not streaming")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    endpoint: String,
    state: &'static str,
    connection_attempts: u64,
    records: u64,
    decode_errors: u64,
    retry_delay_secs: f64,
    queued_samples: usize,
    evicted_samples: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        endpoint: state.endpoint.clone(),
        state: state.status.state().as_str(),
        connection_attempts: state.status.attempts(),
        records: state.status.records(),
        decode_errors: state.status.decode_errors(),
        retry_delay_secs: state.status.current_delay().as_secs_f64(),
        queued_samples: state.queue.len(),
        evicted_samples: state.queue.evicted(),
    })
}
