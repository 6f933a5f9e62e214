// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exporter configuration.
//!
//! Everything here is checked by [`ExporterConfig::validate`] before the
//! first connection attempt; a failure is a [`ConfigError`] and the process
//! exits without ever touching the network.

use std::time::Duration;

use gpsd_stream::{BackoffConfig, ClientConfig, ConfigError, Endpoint, WatchOptions, NSEC_PER_SEC};

/// Default port for the metrics endpoint
pub const EXPORTER_PORT: u16 = 9015;

/// Default capacity of the satellite observation queue
pub const DEFAULT_QUEUE_SIZE: usize = 2000;

/// Linear histogram bucket layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    /// Width of one bucket
    pub size: f64,
    /// Number of buckets
    pub count: u32,
}

impl BucketSpec {
    /// Create a bucket layout
    pub fn new(size: f64, count: u32) -> Self {
        Self { size, count }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{} bucket size must be a positive number, got {}",
                name, self.size
            )));
        }
        if self.count < 2 {
            return Err(ConfigError::Invalid(format!(
                "{} bucket count must be at least 2, got {}",
                name, self.count
            )));
        }
        Ok(())
    }

    /// Upper bounds `size, 2*size, .., (count-1)*size` for non-negative values
    pub fn positive(&self) -> Vec<f64> {
        (1..self.count).map(|i| i as f64 * self.size).collect()
    }

    /// Upper bounds from `-(count/2)*size` to `(count/2)*size`, zero included
    pub fn symmetric(&self) -> Vec<f64> {
        let half = (self.count / 2) as i64;
        (-half..=half).map(|i| i as f64 * self.size).collect()
    }
}

/// Fixed point that positions are compared against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Histogram layout in meters
    pub buckets: BucketSpec,
}

impl GeoReference {
    /// Build from the command line triple
    ///
    /// Returns `None` when offset tracking is disabled. Enabling it without
    /// both coordinates is an error.
    pub fn from_options(
        enabled: bool,
        lat: Option<f64>,
        lon: Option<f64>,
        buckets: BucketSpec,
    ) -> Result<Option<Self>, ConfigError> {
        if !enabled {
            return Ok(None);
        }
        match (lat, lon) {
            (Some(lat), Some(lon)) => Ok(Some(Self { lat, lon, buckets })),
            _ => Err(ConfigError::Invalid(
                "--offset-from-geopoint requires --geopoint-lat and --geopoint-lon".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ConfigError::Invalid(format!(
                "geopoint latitude {} out of range",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ConfigError::Invalid(format!(
                "geopoint longitude {} out of range",
                self.lon
            )));
        }
        self.buckets.validate("geo")
    }
}

/// PPS offset histogram settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpsConfig {
    /// Histogram layout in nanoseconds
    pub buckets: BucketSpec,
    /// Local clock offset (`time1` in ntp.conf), seconds
    pub time1: f64,
}

impl PpsConfig {
    /// Reference phase in nanoseconds
    pub fn reference_nsec(&self) -> f64 {
        self.time1 * NSEC_PER_SEC as f64
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.time1.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "pps time1 {} is not a number",
                self.time1
            )));
        }
        self.buckets.validate("pps")
    }
}

/// Complete exporter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    /// gpsd address or replay file
    pub endpoint: Endpoint,
    /// Socket timeouts and read size
    pub client: ClientConfig,
    /// Reconnect delays
    pub backoff: BackoffConfig,
    /// Port for the metrics HTTP server
    pub exporter_port: u16,
    /// Export per-satellite metrics
    pub monitor_satellites: bool,
    /// Capacity of the observation queue
    pub queue_size: usize,
    /// Offset tracking, when enabled
    pub geo: Option<GeoReference>,
    /// PPS histogram, when enabled
    pub pps: Option<PpsConfig>,
    /// Switch to nobody:nogroup after the first connect when running as root
    pub drop_privileges: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            client: ClientConfig::default(),
            backoff: BackoffConfig::default(),
            exporter_port: EXPORTER_PORT,
            monitor_satellites: true,
            queue_size: DEFAULT_QUEUE_SIZE,
            geo: None,
            pps: None,
            drop_privileges: true,
        }
    }
}

impl ExporterConfig {
    /// Check every setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.client.read_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "queue size must be at least 1".to_string(),
            ));
        }
        self.backoff.validate()?;
        if let Some(geo) = &self.geo {
            geo.validate()?;
        }
        if let Some(pps) = &self.pps {
            pps.validate()?;
        }
        Ok(())
    }

    /// WATCH request sent on every connect
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions::exporter().with_pps(self.pps.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ExporterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_positive_buckets() {
        let buckets = BucketSpec::new(0.5, 5).positive();
        assert_eq!(buckets, vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_symmetric_buckets() {
        let buckets = BucketSpec::new(250.0, 4).symmetric();
        assert_eq!(buckets, vec![-500.0, -250.0, 0.0, 250.0, 500.0]);

        // Odd counts round the half down
        assert_eq!(BucketSpec::new(1.0, 5).symmetric().len(), 5);
        assert_eq!(BucketSpec::new(250.0, 40).symmetric().len(), 41);
    }

    #[test]
    fn test_geo_requires_both_coordinates() {
        let buckets = BucketSpec::new(0.5, 40);
        assert_eq!(
            GeoReference::from_options(false, None, None, buckets),
            Ok(None)
        );
        assert!(GeoReference::from_options(true, Some(52.0), None, buckets).is_err());
        assert!(GeoReference::from_options(true, None, Some(4.0), buckets).is_err());

        let geo = GeoReference::from_options(true, Some(52.0), Some(4.0), buckets)
            .unwrap()
            .unwrap();
        assert_eq!((geo.lat, geo.lon), (52.0, 4.0));
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = ExporterConfig {
            geo: Some(GeoReference {
                lat: 91.0,
                lon: 4.0,
                buckets: BucketSpec::new(0.5, 40),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.geo = None;
        config.pps = Some(PpsConfig {
            buckets: BucketSpec::new(0.0, 40),
            time1: 0.0,
        });
        assert!(config.validate().is_err());

        config.pps = None;
        config.queue_size = 0;
        assert!(config.validate().is_err());

        config.queue_size = 10;
        config.backoff = BackoffConfig::new(Duration::from_secs(30), Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_watch_requests_pps_only_when_needed() {
        let mut config = ExporterConfig::default();
        assert!(!config.watch_options().pps);

        config.pps = Some(PpsConfig {
            buckets: BucketSpec::new(250.0, 40),
            time1: 0.0,
        });
        assert!(config.watch_options().pps);
        assert!(config.watch_options().scaled);
    }

    #[test]
    fn test_pps_reference() {
        let pps = PpsConfig {
            buckets: BucketSpec::new(250.0, 40),
            time1: 0.000_5,
        };
        assert!((pps.reference_nsec() - 500_000.0).abs() < 1e-6);
    }
}
