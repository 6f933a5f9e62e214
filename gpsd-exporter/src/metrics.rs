// gpsd-exporter - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for gpsd monitoring.
//!
//! Every metric lives in one [`Registry`] owned by [`ExporterMetrics`], which
//! is shared between the stream worker (writes) and the scrape handler
//! (encodes). Metric names match the ones dashboards already use.

use prometheus::core::Collector;
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry, TextEncoder,
};

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};

/// SKY fields exported as plain gauges: (field, metric, help)
pub const SKY_GAUGES: &[(&str, &str, &str)] = &[
    ("gdop", "gpsd_gdop", "Geometric (hyperspherical) dilution of precision"),
    ("hdop", "gpsd_hdop", "Horizontal dilution of precision"),
    ("pdop", "gpsd_pdop", "Position (spherical/3D) dilution of precision"),
    ("tdop", "gpsd_tdop", "Time dilution of precision"),
    ("vdop", "gpsd_vdop", "Vertical (altitude) dilution of precision"),
    ("ydop", "gpsd_ydop", "Longitudinal dilution of precision"),
    ("xdop", "gpsd_xdop", "Latitudinal dilution of precision"),
    ("nSat", "gpsd_nSat", "Number of satellite objects in \"satellites\" array"),
    ("uSat", "gpsd_uSat", "Number of satellites used in navigation solution"),
];

/// TPV fields exported as plain gauges: (field, metric, help)
pub const TPV_GAUGES: &[(&str, &str, &str)] = &[
    ("lat", "gpsd_lat", "Latitude in degrees: +/- signifies North/South"),
    ("lon", "gpsd_long", "Longitude in degrees: +/- signifies East/West"),
    ("altHAE", "gpsd_altHAE", "Altitude, height above ellipsoid, in meters"),
    ("altMSL", "gpsd_altMSL", "MSL altitude in meters"),
    ("mode", "gpsd_mode", "NMEA mode: 0=no mode value yet seen, 1=no fix, 2=2D, 3=3D"),
    ("status", "gpsd_status", "GPS fix status: 2=DGPS, 3=RTK fixed, 4=RTK float, 5=DR, 6=GNSSDR, 7=time, 8=simulated, 9=P(Y)"),
    ("leapseconds", "gpsd_leapseconds", "Current leap seconds"),
    ("magvar", "gpsd_magvar", "Magnetic variation, degrees"),
    ("ept", "gpsd_ept", "Estimated timestamp error in seconds"),
    ("epx", "gpsd_epx", "Longitude error estimate in meters"),
    ("epy", "gpsd_epy", "Latitude error estimate in meters"),
    ("epv", "gpsd_epv", "Estimated vertical error in meters"),
    ("eps", "gpsd_eps", "Estimated speed error in meters per second"),
    ("epc", "gpsd_epc", "Estimated climb error in meters per second"),
    ("geoidSep", "gpsd_geoidSep", "Difference between the WGS84 ellipsoid and the geoid in meters"),
    ("eph", "gpsd_eph", "Estimated horizontal position (2D) error in meters"),
    ("sep", "gpsd_sep", "Estimated spherical (3D) position error in meters"),
    ("ecefx", "gpsd_ecefx", "ECEF X position in meters"),
    ("ecefy", "gpsd_ecefy", "ECEF Y position in meters"),
    ("ecefz", "gpsd_ecefz", "ECEF Z position in meters"),
    ("ecefvx", "gpsd_ecefvx", "ECEF X velocity in meters per second"),
    ("ecefvy", "gpsd_ecefvy", "ECEF Y velocity in meters per second"),
    ("ecefvz", "gpsd_ecefvz", "ECEF Z velocity in meters per second"),
    ("ecefpAcc", "gpsd_ecefpAcc", "ECEF position error in meters"),
    ("velN", "gpsd_velN", "North velocity component in meters per second"),
    ("velE", "gpsd_velE", "East velocity component in meters per second"),
    ("velD", "gpsd_velD", "Down velocity component in meters per second"),
    ("speed", "gpsd_speed", "Speed over ground, meters per second"),
    ("track", "gpsd_track", "Course over ground, degrees from true north"),
    ("climb", "gpsd_climb", "Climb (positive) or sink (negative) rate, meters per second"),
];

/// Labels of `gpsd_version_info`
pub const VERSION_LABELS: [&str; 4] = ["release", "rev", "proto_major", "proto_minor"];

/// Descriptive DEVICE fields, exported as labels after `device`
pub const DEVICE_FIELDS: [&str; 11] = [
    "driver", "subtype", "subtype1", "activated", "flags", "native", "bps", "parity",
    "stopbits", "cycle", "mincycle",
];

/// Offset histograms, present when a reference point is configured
#[derive(Clone)]
pub struct GeoHistograms {
    /// Distance from the reference point
    pub distance: Histogram,
    /// East (+) / west (-) displacement
    pub east: Histogram,
    /// North (+) / south (-) displacement
    pub north: Histogram,
}

/// All metrics exposed by the exporter
pub struct ExporterMetrics {
    registry: Registry,
    sky: Vec<(&'static str, Gauge)>,
    tpv: Vec<(&'static str, Gauge)>,

    /// Satellites listed in the last SKY report
    pub sat_seen: Gauge,
    /// Satellites used in the last SKY report
    pub sat_used: Gauge,
    /// Daemon version, value always 1
    pub version_info: GaugeVec,
    /// One series per device path, value always 1
    pub devices_info: GaugeVec,
    /// Offset from the configured reference point
    pub geo: Option<GeoHistograms>,
    /// PPS offset against the local clock, per device
    pub pps: Option<HistogramVec>,

    // ============================================================
    // Exporter Metrics
    // ============================================================
    /// Records received, by class
    pub records_total: IntCounterVec,
    /// Lines that were not valid JSON objects
    pub decode_errors_total: IntCounter,
    /// Connection attempts since start
    pub connection_attempts_total: IntCounter,
    /// 1 while streaming from gpsd
    pub connected: IntGauge,
}

impl ExporterMetrics {
    /// Create and register every metric the configuration asks for
    pub fn new(config: &ExporterConfig) -> Result<Self> {
        let registry = Registry::new();

        let sky = Self::gauges(&registry, SKY_GAUGES)?;
        let tpv = Self::gauges(&registry, TPV_GAUGES)?;

        let sat_seen = register(
            &registry,
            Gauge::with_opts(Opts::new("gpsd_sat_seen", "Satellites seen in the last SKY report"))?,
        )?;
        let sat_used = register(
            &registry,
            Gauge::with_opts(Opts::new("gpsd_sat_used", "Satellites used in the current solution"))?,
        )?;

        let version_info = register(
            &registry,
            GaugeVec::new(
                Opts::new("gpsd_version_info", "gpsd version details"),
                &VERSION_LABELS,
            )?,
        )?;

        let mut device_labels = vec!["device"];
        device_labels.extend_from_slice(&DEVICE_FIELDS);
        let devices_info = register(
            &registry,
            GaugeVec::new(
                Opts::new("gpsd_devices_info", "gpsd device details"),
                &device_labels,
            )?,
        )?;

        let geo = match &config.geo {
            Some(geo) => Some(GeoHistograms {
                distance: register(
                    &registry,
                    Histogram::with_opts(
                        HistogramOpts::new(
                            "gpsd_geo_offset_m_histogram",
                            "Distance from the static geo point in meters",
                        )
                        .buckets(geo.buckets.positive()),
                    )?,
                )?,
                east: register(
                    &registry,
                    Histogram::with_opts(
                        HistogramOpts::new(
                            "gpsd_geo_bearing_x_histogram",
                            "East (+) / west (-) offset in meters from the static geo point",
                        )
                        .buckets(geo.buckets.symmetric()),
                    )?,
                )?,
                north: register(
                    &registry,
                    Histogram::with_opts(
                        HistogramOpts::new(
                            "gpsd_geo_bearing_y_histogram",
                            "North (+) / south (-) offset in meters from the static geo point",
                        )
                        .buckets(geo.buckets.symmetric()),
                    )?,
                )?,
            }),
            None => None,
        };

        let pps = match &config.pps {
            Some(pps) => Some(register(
                &registry,
                HistogramVec::new(
                    HistogramOpts::new("gpsd_pps_histogram", "PPS offset in nanoseconds")
                        .buckets(pps.buckets.symmetric()),
                    &["device"],
                )?,
            )?),
            None => None,
        };

        let records_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("gpsd_exporter_records_total", "Records received from gpsd"),
                &["class"],
            )?,
        )?;
        let decode_errors_total = register(
            &registry,
            IntCounter::new(
                "gpsd_exporter_decode_errors_total",
                "Lines from gpsd that could not be decoded",
            )?,
        )?;
        let connection_attempts_total = register(
            &registry,
            IntCounter::new(
                "gpsd_exporter_connection_attempts_total",
                "Connection attempts to gpsd",
            )?,
        )?;
        let connected = register(
            &registry,
            IntGauge::new("gpsd_exporter_connected", "1 while streaming from gpsd")?,
        )?;

        Ok(Self {
            registry,
            sky,
            tpv,
            sat_seen,
            sat_used,
            version_info,
            devices_info,
            geo,
            pps,
            records_total,
            decode_errors_total,
            connection_attempts_total,
            connected,
        })
    }

    fn gauges(
        registry: &Registry,
        table: &[(&'static str, &str, &str)],
    ) -> Result<Vec<(&'static str, Gauge)>> {
        table
            .iter()
            .map(|(field, name, help)| {
                let gauge = register(registry, Gauge::with_opts(Opts::new(*name, *help))?)?;
                Ok((*field, gauge))
            })
            .collect()
    }

    /// SKY gauges keyed by record field
    pub fn sky_gauges(&self) -> &[(&'static str, Gauge)] {
        &self.sky
    }

    /// TPV gauges keyed by record field
    pub fn tpv_gauges(&self) -> &[(&'static str, Gauge)] {
        &self.tpv
    }

    /// Add a scrape-time collector to the registry
    pub fn register_collector(&self, collector: Box<dyn Collector>) -> Result<()> {
        self.registry.register(collector)?;
        Ok(())
    }

    /// Encode all metrics to Prometheus text format.
    ///
    /// Gathering runs every registered collector, so this drains the
    /// observation queue.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ExporterError::Server(e.to_string()))
    }
}

fn register<C>(registry: &Registry, collector: C) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}
