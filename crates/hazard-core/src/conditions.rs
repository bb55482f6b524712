use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Current weather at a point as reported by the weather source.
///
/// Every field is optional because upstream payloads omit metrics freely;
/// completeness is judged once, in [`ProbeResult::from_readings`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Sustained wind speed in km/h.
    pub wind_speed: Option<f64>,
    /// Gust speed in km/h.
    pub wind_gust: Option<f64>,
    /// Meteorological direction the wind blows from, in degrees.
    pub wind_direction: Option<f64>,
    /// Precipitation in mm.
    pub precipitation: Option<f64>,
    /// WMO weather interpretation code.
    pub weather_code: Option<i32>,
}

/// Current sea state at a point as reported by the marine source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarineReading {
    /// Significant wave height in metres.
    pub wave_height: Option<f64>,
    /// Direction waves come from, in degrees.
    pub wave_direction: Option<f64>,
    /// Wave period in seconds.
    pub wave_period: Option<f64>,
}

/// Combined probe output for one lattice point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub point: GeoPoint,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub precipitation: Option<f64>,
    pub wave_height: Option<f64>,
}

impl ProbeResult {
    /// Merge both readings for `point`. Returns `None` unless every metric the
    /// classifier needs is present and finite.
    pub fn from_readings(
        point: GeoPoint,
        weather: &WeatherReading,
        marine: &MarineReading,
    ) -> Option<Self> {
        let result = Self {
            point,
            wind_speed: weather.wind_speed,
            wind_gust: weather.wind_gust,
            precipitation: weather.precipitation,
            wave_height: marine.wave_height,
        };
        result.is_complete().then_some(result)
    }

    pub fn is_complete(&self) -> bool {
        [
            self.wind_speed,
            self.wind_gust,
            self.precipitation,
            self.wave_height,
        ]
        .iter()
        .all(|metric| metric.is_some_and(f64::is_finite))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> WeatherReading {
        WeatherReading {
            wind_speed: Some(12.0),
            wind_gust: Some(20.0),
            wind_direction: Some(45.0),
            precipitation: Some(0.0),
            weather_code: Some(1),
        }
    }

    #[test]
    fn complete_readings_merge() {
        let marine = MarineReading {
            wave_height: Some(0.8),
            ..Default::default()
        };
        let result = ProbeResult::from_readings(GeoPoint::new(9.0, 125.0), &weather(), &marine)
            .expect("complete");
        assert_eq!(result.wave_height, Some(0.8));
        assert_eq!(result.wind_gust, Some(20.0));
    }

    #[test]
    fn missing_metric_is_incomplete() {
        let marine = MarineReading::default();
        assert!(ProbeResult::from_readings(GeoPoint::new(9.0, 125.0), &weather(), &marine).is_none());

        let mut gusty = weather();
        gusty.wind_gust = Some(f64::NAN);
        let marine = MarineReading {
            wave_height: Some(1.0),
            ..Default::default()
        };
        assert!(ProbeResult::from_readings(GeoPoint::new(9.0, 125.0), &gusty, &marine).is_none());
    }
}
