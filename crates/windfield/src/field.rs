use hazard_core::{BoundingBox, GeoPoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Vector returned wherever no field data applies: a gentle breeze setting
/// to the north-east, in m/s. Failed wind-grid nodes use it as well.
pub const FALLBACK_VECTOR: WindVector = WindVector { u: 1.0, v: 1.0 };

/// Horizontal wind components in m/s. `u` is eastward, `v` northward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindVector {
    pub u: f64,
    pub v: f64,
}

impl WindVector {
    pub const fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    /// Convert a speed and a meteorological "from" direction into components.
    pub fn from_speed_direction(speed: f64, from_deg: f64) -> Self {
        let rad = from_deg.to_radians();
        Self {
            u: -speed * rad.sin(),
            v: -speed * rad.cos(),
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.u.hypot(self.v)
    }
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field shape mismatch: expected {expected} values, got u={u} v={v}")]
    ShapeMismatch { expected: usize, u: usize, v: usize },
    #[error("field grid must be at least 2x2, got {nx}x{ny}")]
    DegenerateGrid { nx: usize, ny: usize },
    #[error("field grid {nx}x{ny} has more nodes than can be addressed")]
    GridTooLarge { nx: usize, ny: usize },
    #[error("field spacing must be positive and finite (dLng={d_lng}, dLat={d_lat})")]
    InvalidSpacing { d_lng: f64, d_lat: f64 },
    #[error("field contains non-finite components")]
    NonFinite,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Grid geometry. The origin is the north-west node; columns advance east by
/// `d_lng`, rows advance south by `d_lat`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldHeader {
    pub origin_lng: f64,
    pub origin_lat: f64,
    pub d_lng: f64,
    pub d_lat: f64,
    pub nx: usize,
    pub ny: usize,
}

impl FieldHeader {
    /// Header whose corner nodes sit exactly on the corners of `bounds`.
    pub fn covering(bounds: &BoundingBox, nx: usize, ny: usize) -> Self {
        let nx = nx.max(2);
        let ny = ny.max(2);
        Self {
            origin_lng: bounds.west,
            origin_lat: bounds.north,
            d_lng: bounds.lng_span() / (nx - 1) as f64,
            d_lat: bounds.lat_span() / (ny - 1) as f64,
            nx,
            ny,
        }
    }

    pub fn len(&self) -> usize {
        self.nx.saturating_mul(self.ny)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geographic position of node `(i, j)`.
    pub fn node_point(&self, i: usize, j: usize) -> GeoPoint {
        GeoPoint::new(
            self.origin_lat - j as f64 * self.d_lat,
            self.origin_lng + i as f64 * self.d_lng,
        )
    }

    /// Fractional grid coordinates of `point`; the inverse of [`Self::node_point`].
    pub fn grid_coords(&self, point: GeoPoint) -> (f64, f64) {
        let fx = (point.lng() - self.origin_lng).rem_euclid(360.0) / self.d_lng;
        let fy = (self.origin_lat - point.lat()) / self.d_lat;
        (fx, fy)
    }

    fn validate(&self) -> Result<(), FieldError> {
        if self.nx < 2 || self.ny < 2 {
            return Err(FieldError::DegenerateGrid {
                nx: self.nx,
                ny: self.ny,
            });
        }
        if self.nx.checked_mul(self.ny).is_none() {
            return Err(FieldError::GridTooLarge {
                nx: self.nx,
                ny: self.ny,
            });
        }
        let spacing_ok = |d: f64| d.is_finite() && d > 0.0;
        if !spacing_ok(self.d_lng)
            || !spacing_ok(self.d_lat)
            || !self.origin_lng.is_finite()
            || !self.origin_lat.is_finite()
        {
            return Err(FieldError::InvalidSpacing {
                d_lng: self.d_lng,
                d_lat: self.d_lat,
            });
        }
        Ok(())
    }
}

/// Row-major wind grid: index `j * nx + i`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorFieldSnapshot {
    pub header: FieldHeader,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
}

impl VectorFieldSnapshot {
    /// Build a snapshot from per-node vectors in row-major order.
    pub fn from_vectors(header: FieldHeader, vectors: &[WindVector]) -> Result<Self, FieldError> {
        let snapshot = Self {
            header,
            u: vectors.iter().map(|w| w.u).collect(),
            v: vectors.iter().map(|w| w.v).collect(),
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn from_json(data: &str) -> Result<Self, FieldError> {
        let snapshot: Self = serde_json::from_str(data)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        self.header.validate()?;
        let expected = self.header.len();
        if self.u.len() != expected || self.v.len() != expected {
            return Err(FieldError::ShapeMismatch {
                expected,
                u: self.u.len(),
                v: self.v.len(),
            });
        }
        if self.u.iter().chain(&self.v).any(|c| !c.is_finite()) {
            return Err(FieldError::NonFinite);
        }
        Ok(())
    }

    /// Vector stored at node `(i, j)`. Callers guarantee the indices are in range.
    pub fn node(&self, i: usize, j: usize) -> WindVector {
        let idx = j * self.header.nx + i;
        WindVector::new(self.u[idx], self.v[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn header(nx: usize, ny: usize) -> FieldHeader {
        FieldHeader {
            origin_lng: 120.0,
            origin_lat: 12.0,
            d_lng: 1.0,
            d_lat: 1.0,
            nx,
            ny,
        }
    }

    #[test]
    fn parses_camel_case_json() {
        let json = r#"{
            "header": {"originLng": 120.0, "originLat": 12.0, "dLng": 1.0, "dLat": 1.0, "nx": 2, "ny": 2},
            "u": [1.0, 2.0, 3.0, 4.0],
            "v": [0.0, 0.0, 0.0, 0.0]
        }"#;
        let snapshot = VectorFieldSnapshot::from_json(json).expect("valid snapshot");
        assert_eq!(snapshot.node(1, 1), WindVector::new(4.0, 0.0));
    }

    #[rstest]
    #[case(header(2, 2), 3, 4)]
    #[case(header(3, 2), 6, 5)]
    fn rejects_shape_mismatch(#[case] header: FieldHeader, #[case] u: usize, #[case] v: usize) {
        let snapshot = VectorFieldSnapshot {
            header,
            u: vec![0.0; u],
            v: vec![0.0; v],
        };
        assert!(matches!(
            snapshot.validate(),
            Err(FieldError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_degenerate_grid_and_bad_spacing() {
        let thin = VectorFieldSnapshot {
            header: header(1, 4),
            u: vec![0.0; 4],
            v: vec![0.0; 4],
        };
        assert!(matches!(thin.validate(), Err(FieldError::DegenerateGrid { .. })));

        let mut flat = header(2, 2);
        flat.d_lat = 0.0;
        let flat = VectorFieldSnapshot {
            header: flat,
            u: vec![0.0; 4],
            v: vec![0.0; 4],
        };
        assert!(matches!(flat.validate(), Err(FieldError::InvalidSpacing { .. })));
    }

    #[test]
    fn oversized_header_is_rejected_not_multiplied() {
        let json = r#"{
            "header": {"originLng": 0.0, "originLat": 0.0, "dLng": 1.0, "dLat": 1.0,
                       "nx": 4294967296, "ny": 4294967296},
            "u": [],
            "v": []
        }"#;
        assert!(matches!(
            VectorFieldSnapshot::from_json(json),
            Err(FieldError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn covering_header_round_trips_corner_nodes() {
        let bounds = BoundingBox::new(10.0, 8.0, -178.0, 178.0);
        let header = FieldHeader::covering(&bounds, 5, 3);
        assert_eq!(header.node_point(0, 0), GeoPoint::new(10.0, 178.0));
        assert_eq!(header.node_point(4, 2), GeoPoint::new(8.0, -178.0));
        let (fx, fy) = header.grid_coords(GeoPoint::new(9.0, 180.0));
        assert!((fx - 2.0).abs() < 1e-9);
        assert!((fy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn northerly_wind_blows_south() {
        let wind = WindVector::from_speed_direction(10.0, 0.0);
        assert!(wind.u.abs() < 1e-9);
        assert!((wind.v + 10.0).abs() < 1e-9);
    }
}
