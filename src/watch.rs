// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! WATCH command generation
//!
//! gpsd only streams reports after a `?WATCH={...}` request. The options
//! select which report families and encodings the daemon emits.

use serde::Serialize;

/// Raw packet dump level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawMode {
    /// No raw packets
    #[default]
    Off,
    /// Packets as hex dumps
    Hex,
    /// Packets verbatim
    Binary,
}

impl RawMode {
    fn level(self) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Hex => Some(1),
            Self::Binary => Some(2),
        }
    }
}

/// Streaming options for the WATCH command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Enable (true) or disable (false) streaming
    pub enable: bool,
    /// JSON reports
    pub json: bool,
    /// NMEA sentences
    pub nmea: bool,
    /// Raw packet dumps
    pub raw: RawMode,
    /// Scale values to natural units
    pub scaled: bool,
    /// Timing information
    pub timing: bool,
    /// Split AIS type 24 messages
    pub split24: bool,
    /// PPS reports
    pub pps: bool,
    /// Restrict to one device path
    pub device: Option<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enable: true,
            json: true,
            nmea: false,
            raw: RawMode::Off,
            scaled: false,
            timing: false,
            split24: false,
            pps: false,
            device: None,
        }
    }
}

#[derive(Serialize)]
struct WatchRequest<'a> {
    enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nmea: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scaled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    split24: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pps: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

impl WatchOptions {
    /// Options used by the exporter: JSON reports with scaled values
    pub fn exporter() -> Self {
        Self {
            scaled: true,
            ..Default::default()
        }
    }

    /// Turn streaming off for the same selection
    pub fn disable() -> Self {
        Self {
            enable: false,
            ..Default::default()
        }
    }

    /// Also request PPS reports
    pub fn with_pps(mut self, pps: bool) -> Self {
        self.pps = pps;
        self
    }

    /// Restrict to one device
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Render the command, without line terminator
    ///
    /// Only the selected options are sent. With neither JSON, NMEA nor raw
    /// output selected, JSON is implied. When disabling, each selected
    /// option is switched off and the device filter is omitted.
    pub fn command(&self) -> String {
        let json = self.json || (!self.nmea && self.raw == RawMode::Off);
        let flag = |on: bool| if on { Some(self.enable) } else { None };

        let request = WatchRequest {
            enable: self.enable,
            json: flag(json),
            nmea: flag(self.nmea),
            raw: self.raw.level(),
            scaled: flag(self.scaled),
            timing: flag(self.timing),
            split24: flag(self.split24),
            pps: flag(self.pps),
            device: if self.enable {
                self.device.as_deref()
            } else {
                None
            },
        };

        // Serializing plain bools, integers and strings cannot fail.
        let body = serde_json::to_string(&request).unwrap_or_else(|_| "{}".to_string());
        format!("?WATCH={}", body)
    }
}
