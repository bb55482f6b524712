//! HTTP clients for the Open-Meteo forecast and marine endpoints.

use std::time::Duration;

use hazard_core::{GeoPoint, MarineReading, WeatherReading};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::trace;

use crate::{
    source::{MarineSource, WeatherSource},
    types::SourceError,
};

pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_MARINE_URL: &str = "https://marine-api.open-meteo.com/v1/marine";

const WEATHER_FIELDS: &str =
    "wind_speed_10m,wind_gusts_10m,wind_direction_10m,precipitation,weather_code";
const MARINE_FIELDS: &str = "wave_height,wave_direction,wave_period";

#[derive(Deserialize)]
struct Envelope<T> {
    current: Option<T>,
}

#[derive(Deserialize)]
struct CurrentWeather {
    wind_speed_10m: Option<f64>,
    wind_gusts_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    precipitation: Option<f64>,
    weather_code: Option<i32>,
}

#[derive(Deserialize)]
struct CurrentMarine {
    wave_height: Option<f64>,
    wave_direction: Option<f64>,
    wave_period: Option<f64>,
}

fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("marine-watch/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

async fn fetch_current<T: DeserializeOwned>(
    client: &Client,
    base_url: &str,
    point: GeoPoint,
    fields: &str,
) -> Result<T, SourceError> {
    let response = client
        .get(base_url)
        .query(&[
            ("latitude", point.lat().to_string()),
            ("longitude", point.lng().to_string()),
            ("current", fields.to_string()),
            ("timezone", "UTC".to_string()),
        ])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let body = response.bytes().await?;
    let envelope: Envelope<T> =
        serde_json::from_slice(&body).map_err(|err| SourceError::Decode(err.to_string()))?;
    trace!(lat = point.lat(), lng = point.lng(), "Fetched {fields}");
    envelope.current.ok_or(SourceError::MissingMetric("current"))
}

#[derive(Clone, Debug)]
pub struct OpenMeteoWeather {
    client: Client,
    base_url: String,
}

impl OpenMeteoWeather {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

impl WeatherSource for OpenMeteoWeather {
    async fn fetch(&self, point: GeoPoint) -> Result<WeatherReading, SourceError> {
        let current: CurrentWeather =
            fetch_current(&self.client, &self.base_url, point, WEATHER_FIELDS).await?;
        Ok(WeatherReading {
            wind_speed: current.wind_speed_10m,
            wind_gust: current.wind_gusts_10m,
            wind_direction: current.wind_direction_10m,
            precipitation: current.precipitation,
            weather_code: current.weather_code,
        })
    }
}

#[derive(Clone, Debug)]
pub struct OpenMeteoMarine {
    client: Client,
    base_url: String,
}

impl OpenMeteoMarine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

impl MarineSource for OpenMeteoMarine {
    async fn fetch(&self, point: GeoPoint) -> Result<MarineReading, SourceError> {
        let current: CurrentMarine =
            fetch_current(&self.client, &self.base_url, point, MARINE_FIELDS).await?;
        Ok(MarineReading {
            wave_height: current.wave_height,
            wave_direction: current.wave_direction,
            wave_period: current.wave_period,
        })
    }
}
