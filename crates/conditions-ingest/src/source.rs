use std::future::Future;

use hazard_core::{GeoPoint, MarineReading, WeatherReading};

use crate::types::SourceError;

/// Current weather at a point.
pub trait WeatherSource: Send + Sync {
    fn fetch(
        &self,
        point: GeoPoint,
    ) -> impl Future<Output = Result<WeatherReading, SourceError>> + Send;
}

/// Current sea state at a point.
pub trait MarineSource: Send + Sync {
    fn fetch(
        &self,
        point: GeoPoint,
    ) -> impl Future<Output = Result<MarineReading, SourceError>> + Send;
}
