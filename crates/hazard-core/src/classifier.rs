//! Threshold-based hazard classification.

use serde::{Deserialize, Serialize};

use crate::{conditions::ProbeResult, geo::GeoPoint};

const GENERIC_SUMMARY: &str = "strong marine conditions";
const SUMMARY_SEPARATOR: &str = " · ";

/// Trip levels for each metric. A point is hazardous when any one is reached.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardThresholds {
    /// Sustained wind, km/h.
    pub wind_speed: f64,
    /// Gusts, km/h.
    pub wind_gust: f64,
    /// Significant wave height, m.
    pub wave_height: f64,
    /// Precipitation, mm.
    pub precipitation: f64,
}

impl Default for HazardThresholds {
    fn default() -> Self {
        Self {
            wind_speed: 40.0,
            wind_gust: 60.0,
            wave_height: 2.5,
            precipitation: 10.0,
        }
    }
}

/// Metrics that produced a flag, kept for popups and logging.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wave_height: Option<f64>,
    pub precipitation: Option<f64>,
}

/// Classified sample point. Built once per scan and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardFlag {
    pub point: GeoPoint,
    pub severity: bool,
    pub summary: String,
    pub raw_metrics: RawMetrics,
}

fn tripped(value: Option<f64>, threshold: f64) -> Option<f64> {
    value.filter(|v| *v >= threshold)
}

/// Classify a single probe result.
pub fn classify(result: &ProbeResult, thresholds: &HazardThresholds) -> HazardFlag {
    let mut parts = Vec::with_capacity(4);
    if let Some(wind) = tripped(result.wind_speed, thresholds.wind_speed) {
        parts.push(format!("Wind {:.0} km/h", wind.round()));
    }
    if let Some(gust) = tripped(result.wind_gust, thresholds.wind_gust) {
        parts.push(format!("Gust {:.0} km/h", gust.round()));
    }
    if let Some(wave) = tripped(result.wave_height, thresholds.wave_height) {
        parts.push(format!("Wave {wave:.1} m"));
    }
    if let Some(rain) = tripped(result.precipitation, thresholds.precipitation) {
        parts.push(format!("Rain {:.0} mm", rain.round()));
    }

    let severity = !parts.is_empty();
    let summary = if severity {
        parts.join(SUMMARY_SEPARATOR)
    } else {
        GENERIC_SUMMARY.to_string()
    };

    HazardFlag {
        point: result.point,
        severity,
        summary,
        raw_metrics: RawMetrics {
            wind_speed: result.wind_speed,
            wind_gust: result.wind_gust,
            wave_height: result.wave_height,
            precipitation: result.precipitation,
        },
    }
}

/// Classify a batch and keep only the hazardous points, in input order.
pub fn classify_all(results: &[ProbeResult], thresholds: &HazardThresholds) -> Vec<HazardFlag> {
    results
        .iter()
        .map(|result| classify(result, thresholds))
        .filter(|flag| flag.severity)
        .collect()
}
