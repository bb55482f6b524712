//! Windowed fetching of point conditions.
//!
//! Points are processed in chunks of `window`; both sources are queried
//! concurrently for every point in a chunk, and the next chunk starts only
//! after the current one has fully resolved. At most `window` points are
//! outstanding at any moment. A point whose fetch fails, times out or lacks a
//! required metric is dropped without affecting its siblings.

use std::time::Duration;

use futures::future::join_all;
use hazard_core::{GeoPoint, MarineReading, ProbeResult, WeatherReading};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span};

use crate::{
    source::{MarineSource, WeatherSource},
    types::SourceError,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Points fetched concurrently per chunk.
    pub window: usize,
    /// Upper bound for each individual source call.
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            window: 5,
            timeout: Duration::from_secs(8),
        }
    }
}

/// Raw readings captured for a single point, each `None` when its source failed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointConditions {
    pub weather: Option<WeatherReading>,
    pub marine: Option<MarineReading>,
}

pub struct BoundedFieldProbe<W, M> {
    weather: W,
    marine: M,
    settings: ProbeSettings,
}

impl<W: WeatherSource, M: MarineSource> BoundedFieldProbe<W, M> {
    pub fn new(weather: W, marine: M, settings: ProbeSettings) -> Self {
        Self {
            weather,
            marine,
            settings: ProbeSettings {
                window: settings.window.max(1),
                ..settings
            },
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn weather(&self) -> &W {
        &self.weather
    }

    /// Fetch every point and keep the complete results, in input order.
    pub async fn probe(&self, points: &[GeoPoint]) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(points.len());
        for (index, chunk) in points.chunks(self.settings.window).enumerate() {
            let span = info_span!("probe.chunk", index, size = chunk.len());
            let outcomes = join_all(chunk.iter().map(|point| self.probe_point(*point)))
                .instrument(span)
                .await;
            results.extend(outcomes.into_iter().flatten());
        }

        let dropped = points.len() - results.len();
        metrics::counter!("marine_scan_points_total").increment(points.len() as u64);
        metrics::counter!("marine_probe_dropped_points_total").increment(dropped as u64);
        debug!(
            requested = points.len(),
            complete = results.len(),
            dropped,
            "Probe finished"
        );
        results
    }

    /// Fetch both readings for one point, keeping whichever succeeded.
    pub async fn conditions(&self, point: GeoPoint) -> PointConditions {
        let (weather, marine) = self.fetch_both(point).await;
        PointConditions {
            weather: weather.ok(),
            marine: marine.ok(),
        }
    }

    async fn probe_point(&self, point: GeoPoint) -> Option<ProbeResult> {
        let (weather, marine) = self.fetch_both(point).await;
        let (weather, marine) = match (weather, marine) {
            (Ok(weather), Ok(marine)) => (weather, marine),
            (Err(err), _) | (_, Err(err)) => {
                debug!(lat = point.lat(), lng = point.lng(), "Dropping point: {err}");
                return None;
            }
        };
        let result = ProbeResult::from_readings(point, &weather, &marine);
        if result.is_none() {
            debug!(
                lat = point.lat(),
                lng = point.lng(),
                "Dropping point: incomplete metrics"
            );
        }
        result
    }

    async fn fetch_both(
        &self,
        point: GeoPoint,
    ) -> (
        Result<WeatherReading, SourceError>,
        Result<MarineReading, SourceError>,
    ) {
        let limit = self.settings.timeout;
        let (weather, marine) = tokio::join!(
            timeout(limit, self.weather.fetch(point)),
            timeout(limit, self.marine.fetch(point)),
        );
        (
            weather.unwrap_or(Err(SourceError::Timeout)),
            marine.unwrap_or(Err(SourceError::Timeout)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Clone, Default)]
    struct InFlight {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct StubWeather {
        in_flight: InFlight,
        fail_at: Option<GeoPoint>,
        stall_at: Option<GeoPoint>,
    }

    impl StubWeather {
        fn calm() -> Self {
            Self {
                in_flight: InFlight::default(),
                fail_at: None,
                stall_at: None,
            }
        }
    }

    impl WeatherSource for StubWeather {
        async fn fetch(&self, point: GeoPoint) -> Result<WeatherReading, SourceError> {
            let now = self.in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.peak.fetch_max(now, Ordering::SeqCst);
            let delay = if self.stall_at == Some(point) { 500 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.current.fetch_sub(1, Ordering::SeqCst);
            if self.fail_at == Some(point) {
                return Err(SourceError::Status(503));
            }
            Ok(WeatherReading {
                wind_speed: Some(12.0),
                wind_gust: Some(18.0),
                wind_direction: Some(90.0),
                precipitation: Some(0.0),
                weather_code: Some(1),
            })
        }
    }

    struct StubMarine {
        missing_at: Option<GeoPoint>,
    }

    impl MarineSource for StubMarine {
        async fn fetch(&self, point: GeoPoint) -> Result<MarineReading, SourceError> {
            let wave_height = if self.missing_at == Some(point) {
                None
            } else {
                Some(0.8)
            };
            Ok(MarineReading {
                wave_height,
                wave_direction: Some(180.0),
                wave_period: Some(6.0),
            })
        }
    }

    fn points(n: usize) -> Vec<GeoPoint> {
        (0..n).map(|i| GeoPoint::new(8.0 + i as f64 * 0.5, 125.0)).collect()
    }

    fn settings(window: usize) -> ProbeSettings {
        ProbeSettings {
            window,
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn outstanding_fetches_never_exceed_window() {
        let weather = StubWeather::calm();
        let in_flight = weather.in_flight.clone();
        let probe = BoundedFieldProbe::new(weather, StubMarine { missing_at: None }, settings(5));

        let results = probe.probe(&points(12)).await;

        assert_eq!(results.len(), 12);
        assert_eq!(in_flight.peak.load(Ordering::SeqCst), 5);
        assert_eq!(in_flight.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_failure_drops_only_that_point() {
        let input = points(7);
        let weather = StubWeather {
            fail_at: Some(input[3]),
            ..StubWeather::calm()
        };
        let probe = BoundedFieldProbe::new(weather, StubMarine { missing_at: None }, settings(3));

        let results = probe.probe(&input).await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.point != input[3]));
        assert!(results.windows(2).all(|w| w[0].point.lat() < w[1].point.lat()));
    }

    #[tokio::test]
    async fn timeouts_and_missing_metrics_are_dropped() {
        let input = points(4);
        let weather = StubWeather {
            stall_at: Some(input[0]),
            ..StubWeather::calm()
        };
        let marine = StubMarine {
            missing_at: Some(input[2]),
        };
        let probe = BoundedFieldProbe::new(weather, marine, settings(2));

        let results = probe.probe(&input).await;

        let kept: Vec<_> = results.iter().map(|r| r.point).collect();
        assert_eq!(kept, vec![input[1], input[3]]);
    }

    #[tokio::test]
    async fn conditions_keep_partial_readings() {
        let point = GeoPoint::new(8.0, 125.0);
        let weather = StubWeather {
            fail_at: Some(point),
            ..StubWeather::calm()
        };
        let probe = BoundedFieldProbe::new(weather, StubMarine { missing_at: None }, settings(1));

        let conditions = probe.conditions(point).await;

        assert!(conditions.weather.is_none());
        assert_eq!(
            conditions.marine.and_then(|m| m.wave_height),
            Some(0.8)
        );
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let probe = BoundedFieldProbe::new(
            StubWeather::calm(),
            StubMarine { missing_at: None },
            settings(5),
        );
        assert!(probe.probe(&[]).await.is_empty());
    }
}
