//! One lattice → probe → classify cycle.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use conditions_ingest::{
    BoundedFieldProbe, MarineSource, OpenMeteoMarine, OpenMeteoWeather, WeatherSource,
};
use hazard_core::{BoundingBox, HazardFlag, HazardThresholds, LatticeSpec, classify_all, sample_lattice};
use serde::Serialize;
use tracing::{Instrument, info, info_span};

use crate::watch::config::{ScanConfig, ScanSettings};

#[derive(Clone, Debug, Serialize)]
pub struct ScanReport {
    pub bounds: BoundingBox,
    pub sampled: usize,
    pub complete: usize,
    pub flags: Vec<HazardFlag>,
    pub scanned_at: DateTime<Utc>,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub async fn run_scan<W: WeatherSource, M: MarineSource>(
    probe: &BoundedFieldProbe<W, M>,
    bounds: BoundingBox,
    lattice: &LatticeSpec,
    thresholds: &HazardThresholds,
) -> ScanReport {
    let started = Instant::now();
    let points = sample_lattice(&bounds, lattice);
    let span = info_span!("watch.scan", points = points.len());
    let results = probe.probe(&points).instrument(span).await;
    let flags = classify_all(&results, thresholds);

    let elapsed = started.elapsed();
    metrics::histogram!("marine_scan_seconds").record(elapsed.as_secs_f64());
    metrics::gauge!("marine_hazard_flags").set(flags.len() as f64);
    info!(
        sampled = points.len(),
        complete = results.len(),
        hazards = flags.len(),
        "Scan finished in {:.2}s",
        elapsed.as_secs_f64()
    );

    ScanReport {
        bounds,
        sampled: points.len(),
        complete: results.len(),
        flags,
        scanned_at: Utc::now(),
        elapsed,
    }
}

/// Build the HTTP-backed probe described by `settings`.
pub fn open_meteo_probe(
    settings: &ScanSettings,
) -> Result<BoundedFieldProbe<OpenMeteoWeather, OpenMeteoMarine>> {
    let weather = OpenMeteoWeather::new(settings.weather_url.clone(), settings.probe.timeout)
        .context("Failed to build weather client")?;
    let marine = OpenMeteoMarine::new(settings.marine_url.clone(), settings.probe.timeout)
        .context("Failed to build marine client")?;
    Ok(BoundedFieldProbe::new(weather, marine, settings.probe))
}

/// Scan once and print the report as JSON on stdout.
pub async fn run_once(config: ScanConfig) -> Result<()> {
    let probe = open_meteo_probe(&config.scan)?;
    let report = run_scan(
        &probe,
        config.bounds,
        &config.scan.lattice,
        &config.scan.thresholds,
    )
    .await;
    let json = serde_json::to_string_pretty(&report).context("Failed to encode scan report")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conditions_ingest::{ProbeSettings, SourceError};
    use hazard_core::{GeoPoint, MarineReading, WeatherReading};

    struct Squall;

    impl WeatherSource for Squall {
        async fn fetch(&self, point: GeoPoint) -> Result<WeatherReading, SourceError> {
            let gust = if point.lng() > 125.0 { 75.0 } else { 30.0 };
            Ok(WeatherReading {
                wind_speed: Some(20.0),
                wind_gust: Some(gust),
                wind_direction: Some(10.0),
                precipitation: Some(1.0),
                weather_code: Some(80),
            })
        }
    }

    struct FlatSea;

    impl MarineSource for FlatSea {
        async fn fetch(&self, _point: GeoPoint) -> Result<MarineReading, SourceError> {
            Ok(MarineReading {
                wave_height: Some(0.5),
                ..MarineReading::default()
            })
        }
    }

    #[tokio::test]
    async fn report_counts_points_and_flags() {
        let probe = BoundedFieldProbe::new(Squall, FlatSea, ProbeSettings::default());
        let bounds = BoundingBox::new(10.0, 8.0, 126.0, 124.0);

        let report = run_scan(
            &probe,
            bounds,
            &LatticeSpec::default(),
            &HazardThresholds::default(),
        )
        .await;

        assert_eq!(report.sampled, 25);
        assert_eq!(report.complete, 25);
        // Columns 125.5 and 126.0 gust above threshold.
        assert_eq!(report.flags.len(), 10);
        assert!(report.flags.iter().all(|f| f.summary == "Gust 75 km/h"));
    }
}
