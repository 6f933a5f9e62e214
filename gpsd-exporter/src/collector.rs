// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-satellite metrics built at scrape time.
//!
//! Satellites come and go, so instead of keeping one labelled series per
//! PRN forever, [`SatelliteCollector`] drains the observation queue on every
//! scrape and exports only what was observed since the previous one.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tracing::{debug, warn};

use crate::error::Result;
use crate::queue::{ObservationQueue, Sample};

/// Labels of every per-satellite metric
pub const SATELLITE_LABELS: [&str; 3] = ["PRN", "svid", "gnssid"];

/// Constellation assumed when a report does not name one (GPS)
pub const DEFAULT_GNSSID: &str = "0";

/// Optional satellite fields: (field, metric, help)
const SATELLITE_GAUGES: &[(&str, &str, &str)] = &[
    ("ss", "gpsd_sat_ss", "Signal to noise ratio in dBHz"),
    ("az", "gpsd_sat_az", "Azimuth, degrees from true north"),
    ("el", "gpsd_sat_el", "Elevation in degrees"),
];

const USED: (&str, &str) = ("gpsd_used", "Satellite used in the navigation solution (1) or not (0)");
const HEALTH: (&str, &str) = (
    "gpsd_health",
    "Health of this satellite: 0 is unknown, 1 is OK, 2 is unhealthy",
);

/// Drain the queue into one sample per entity, the latest one winning
pub fn collect_snapshot(queue: &ObservationQueue) -> HashMap<String, Sample> {
    let mut snapshot = HashMap::new();
    for sample in queue.drain() {
        snapshot.insert(sample.id.clone(), sample);
    }
    snapshot
}

/// Label values for a satellite sample, with defaults for missing fields
pub fn satellite_labels(sample: &Sample) -> [String; 3] {
    [
        sample.id.clone(),
        sample
            .fields
            .label("svid")
            .unwrap_or_else(|| sample.id.clone()),
        sample
            .fields
            .label("gnssid")
            .unwrap_or_else(|| DEFAULT_GNSSID.to_string()),
    ]
}

/// Collector draining the observation queue on every gather
pub struct SatelliteCollector {
    queue: Arc<ObservationQueue>,
    opts: Vec<Opts>,
    descs: Vec<Desc>,
}

impl SatelliteCollector {
    /// Create a collector over a shared queue
    pub fn new(queue: Arc<ObservationQueue>) -> Result<Self> {
        let opts: Vec<Opts> = SATELLITE_GAUGES
            .iter()
            .map(|(_, name, help)| (*name, *help))
            .chain([USED, HEALTH])
            .map(|(name, help)| Opts::new(name, help))
            .collect();

        let mut descs = Vec::with_capacity(opts.len());
        for opt in &opts {
            let template = GaugeVec::new(opt.clone(), &SATELLITE_LABELS)?;
            descs.extend(template.desc().into_iter().cloned());
        }

        Ok(Self { queue, opts, descs })
    }

    fn build(&self) -> Result<Vec<GaugeVec>> {
        let mut vecs = Vec::with_capacity(self.opts.len());
        for opt in &self.opts {
            vecs.push(GaugeVec::new(opt.clone(), &SATELLITE_LABELS)?);
        }
        Ok(vecs)
    }
}

impl Collector for SatelliteCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = collect_snapshot(&self.queue);
        let vecs = match self.build() {
            Ok(vecs) => vecs,
            Err(e) => {
                warn!(error = %e, "cannot build satellite metrics");
                return Vec::new();
            }
        };
        let (optional, fixed) = vecs.split_at(SATELLITE_GAUGES.len());

        for sample in snapshot.values() {
            let labels = satellite_labels(sample);
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();

            for ((field, _, _), gauge) in SATELLITE_GAUGES.iter().zip(optional) {
                if let Some(value) = sample.fields.f64(field) {
                    gauge.with_label_values(&labels).set(value);
                }
            }

            let used = sample.fields.bool("used").unwrap_or(false);
            fixed[0]
                .with_label_values(&labels)
                .set(if used { 1.0 } else { 0.0 });
            fixed[1]
                .with_label_values(&labels)
                .set(sample.fields.f64("health").unwrap_or(0.0));
        }
        debug!(satellites = snapshot.len(), "collected satellite snapshot");

        vecs.iter().flat_map(|v| v.collect()).collect()
    }
}
