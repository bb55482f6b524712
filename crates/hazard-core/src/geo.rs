use serde::{Deserialize, Serialize};

/// Wrap any longitude into `[-180, 180)`.
pub fn normalize_lng(lng: f64) -> f64 {
    (lng + 540.0).rem_euclid(360.0) - 180.0
}

/// A geographic coordinate that is always inside the valid range.
///
/// Latitude is clamped to `[-90, 90]` and longitude wrapped into
/// `[-180, 180]` when the point is built, so downstream code never has to
/// re-check it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGeoPoint")]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lng: f64,
}

impl From<RawGeoPoint> for GeoPoint {
    fn from(raw: RawGeoPoint) -> Self {
        GeoPoint::new(raw.lat, raw.lng)
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        let lat = if lat.is_finite() {
            lat.clamp(-90.0, 90.0)
        } else {
            0.0
        };
        let lng = if !lng.is_finite() {
            0.0
        } else if (-180.0..=180.0).contains(&lng) {
            lng
        } else {
            normalize_lng(lng)
        };
        Self { lat, lng }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// Viewport bounds in degrees. `east < west` means the box crosses the
/// antimeridian.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.east < self.west
    }

    /// East bound unwrapped so that it is never smaller than `west`.
    pub fn unwrapped_east(&self) -> f64 {
        if self.crosses_antimeridian() {
            self.east + 360.0
        } else {
            self.east
        }
    }

    /// Longitudinal extent in degrees, accounting for antimeridian crossing.
    pub fn lng_span(&self) -> f64 {
        self.unwrapped_east() - self.west
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn is_empty(&self) -> bool {
        !(self.lat_span() > 0.0 && self.lng_span() > 0.0)
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        if point.lat() < self.south || point.lat() > self.north {
            return false;
        }
        let offset = (point.lng() - self.west).rem_euclid(360.0);
        offset <= self.lng_span()
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.north + self.south) / 2.0,
            self.west + self.lng_span() / 2.0,
        )
    }
}
