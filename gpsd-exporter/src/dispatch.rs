// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Record dispatcher
//!
//! Routes each decoded record by its `class` and turns it into metric
//! updates or queued satellite samples. Absent fields are normal in gpsd
//! reports: they leave the previous value alone and never fail the record.

use std::collections::HashMap;
use std::sync::Arc;

use gpsd_stream::{
    earth_distance_small, meter_offset, DistanceFn, FieldError, Record, RecordClass,
    NSEC_PER_SEC,
};
use tracing::{debug, info, trace, warn};

use crate::config::{ExporterConfig, GeoReference, PpsConfig};
use crate::error::Result;
use crate::metrics::{ExporterMetrics, DEVICE_FIELDS};
use crate::queue::{ObservationQueue, Sample};

/// Placeholder for descriptive fields a report leaves out
pub const UNKNOWN: &str = "Unknown";

/// Offset of a PPS edge against the local reference, folded to +/- half a second
pub fn pps_offset(clock_nsec: f64, reference_nsec: f64) -> f64 {
    let cycle = NSEC_PER_SEC as f64;
    let value = clock_nsec - reference_nsec;
    if value > cycle / 2.0 {
        value - cycle
    } else {
        value
    }
}

/// Turns records into metrics
pub struct RecordDispatcher {
    metrics: Arc<ExporterMetrics>,
    queue: Option<Arc<ObservationQueue>>,
    geo: Option<GeoReference>,
    pps: Option<PpsConfig>,
    distance: DistanceFn,
    /// Label values currently exported per device path
    devices: HashMap<String, Vec<String>>,
}

impl RecordDispatcher {
    /// Create a dispatcher
    ///
    /// Satellite samples are queued only when `queue` is given.
    pub fn new(
        config: &ExporterConfig,
        metrics: Arc<ExporterMetrics>,
        queue: Option<Arc<ObservationQueue>>,
    ) -> Self {
        Self {
            metrics,
            queue,
            geo: config.geo,
            pps: config.pps,
            distance: earth_distance_small,
            devices: HashMap::new(),
        }
    }

    /// Use another distance formula for offset tracking
    pub fn with_distance(mut self, distance: DistanceFn) -> Self {
        self.distance = distance;
        self
    }

    /// Metrics this dispatcher writes to
    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    /// Apply one record
    ///
    /// Only metric label errors are returned; missing fields are logged and
    /// skipped.
    pub fn handle(&mut self, record: &Record) -> Result<()> {
        let Some(class) = record.class() else {
            debug!("record without class: {}", record);
            return Ok(());
        };
        self.metrics
            .records_total
            .get_metric_with_label_values(&[class.as_str()])?
            .inc();

        match class {
            RecordClass::Version => self.version(record),
            RecordClass::Devices => self.devices(record),
            RecordClass::Device => self.device(record),
            RecordClass::Sky => self.sky(record),
            RecordClass::Tpv => self.tpv(record),
            RecordClass::Pps => self.pps(record),
            RecordClass::Watch => Ok(()),
            RecordClass::Error => {
                warn!(
                    message = record.str("message").unwrap_or(UNKNOWN),
                    "gpsd reported an error"
                );
                Ok(())
            }
            other => {
                debug!(class = %other, "received {}", record);
                Ok(())
            }
        }
    }

    fn version(&mut self, record: &Record) -> Result<()> {
        let labels: Vec<String> = ["release", "rev", "proto_major", "proto_minor"]
            .iter()
            .map(|field| record.label(field).unwrap_or_else(|| UNKNOWN.to_string()))
            .collect();
        info!(release = %labels[0], rev = %labels[1], "gpsd version");

        self.metrics.version_info.reset();
        self.metrics
            .version_info
            .get_metric_with_label_values(&as_strs(&labels))?
            .set(1.0);
        Ok(())
    }

    fn devices(&mut self, record: &Record) -> Result<()> {
        let Some(devices) = record.records("devices") else {
            debug!("DEVICES record without device list");
            return Ok(());
        };
        for device in &devices {
            self.device(device)?;
        }
        Ok(())
    }

    fn device(&mut self, device: &Record) -> Result<()> {
        let path = match device.require_str("path") {
            Ok(path) => path.to_string(),
            Err(e) => {
                debug!("skipping device: {}", e);
                return Ok(());
            }
        };

        let mut labels = Vec::with_capacity(DEVICE_FIELDS.len() + 1);
        labels.push(path.clone());
        labels.extend(
            DEVICE_FIELDS
                .iter()
                .map(|field| device.label(field).unwrap_or_else(|| UNKNOWN.to_string())),
        );

        if let Some(previous) = self.devices.get(&path) {
            if *previous == labels {
                return Ok(());
            }
            // Series that is gone already is fine
            let _ = self
                .metrics
                .devices_info
                .remove_label_values(&as_strs(previous));
        }
        self.metrics
            .devices_info
            .get_metric_with_label_values(&as_strs(&labels))?
            .set(1.0);
        debug!(device = %path, "device info updated");
        self.devices.insert(path, labels);
        Ok(())
    }

    fn sky(&mut self, record: &Record) -> Result<()> {
        if let Some(satellites) = record.records("satellites") {
            self.metrics.sat_seen.set(0.0);
            self.metrics.sat_used.set(0.0);

            for sat in satellites {
                self.metrics.sat_seen.inc();
                if sat.bool("used").unwrap_or(false) {
                    self.metrics.sat_used.inc();
                }

                let Some(queue) = &self.queue else {
                    continue;
                };
                match sat.label("PRN") {
                    Some(prn) => queue.push(Sample::new(prn, sat)),
                    None => debug!(
                        "skipping satellite: {}",
                        FieldError::Missing {
                            class: "SKY".to_string(),
                            field: "PRN".to_string(),
                        }
                    ),
                }
            }
        }

        set_present(self.metrics.sky_gauges(), record);
        Ok(())
    }

    fn tpv(&mut self, record: &Record) -> Result<()> {
        set_present(self.metrics.tpv_gauges(), record);

        let (Some(geo), Some(histograms)) = (&self.geo, &self.metrics.geo) else {
            return Ok(());
        };
        let (Some(lat), Some(lon)) = (record.f64("lat"), record.f64("lon")) else {
            trace!("TPV without position, no offset");
            return Ok(());
        };

        let distance = (self.distance)(lat, lon, geo.lat, geo.lon);
        let (east, north) = meter_offset(self.distance, geo.lat, geo.lon, lat, lon);
        debug!(
            "distance {:.2}m offset east = {:.2}m north = {:.2}m",
            distance, east, north
        );

        histograms.distance.observe(distance);
        histograms.east.observe(east);
        histograms.north.observe(north);
        Ok(())
    }

    fn pps(&mut self, record: &Record) -> Result<()> {
        let (Some(pps), Some(histogram)) = (&self.pps, &self.metrics.pps) else {
            return Ok(());
        };
        let clock_nsec = match record.require_f64("clock_nsec") {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping PPS: {}", e);
                return Ok(());
            }
        };

        let offset = pps_offset(clock_nsec, pps.reference_nsec());
        let device = record.label("device").unwrap_or_else(|| UNKNOWN.to_string());
        debug!(device = %device, "PPS offset {} -> {}", clock_nsec, offset);

        histogram
            .get_metric_with_label_values(&[device.as_str()])?
            .observe(offset);
        Ok(())
    }
}

fn set_present(gauges: &[(&'static str, prometheus::Gauge)], record: &Record) {
    for (field, gauge) in gauges {
        if let Some(value) = record.f64(field) {
            gauge.set(value);
        }
    }
}

fn as_strs(labels: &[String]) -> Vec<&str> {
    labels.iter().map(String::as_str).collect()
}
