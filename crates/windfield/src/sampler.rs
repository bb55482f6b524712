//! Bilinear sampling of a loaded wind snapshot.

use hazard_core::GeoPoint;
use tracing::warn;

use crate::{
    field::{FALLBACK_VECTOR, VectorFieldSnapshot, WindVector},
    projection::CanvasProjection,
};

/// Answers point queries against the current snapshot. Absent or malformed
/// data never surfaces as an error; queries fall back to [`FALLBACK_VECTOR`].
#[derive(Clone, Debug)]
pub struct VectorFieldSampler {
    projection: CanvasProjection,
    snapshot: Option<VectorFieldSnapshot>,
}

impl VectorFieldSampler {
    pub fn new(projection: CanvasProjection) -> Self {
        Self {
            projection,
            snapshot: None,
        }
    }

    /// Install `snapshot`, or drop back to the fallback field when it is
    /// malformed. Returns whether the snapshot was accepted.
    pub fn load(&mut self, snapshot: VectorFieldSnapshot) -> bool {
        match snapshot.validate() {
            Ok(()) => {
                self.snapshot = Some(snapshot);
                true
            }
            Err(err) => {
                warn!("Rejected wind field snapshot ({err}); using fallback vectors");
                self.snapshot = None;
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    pub fn has_field(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn projection(&self) -> &CanvasProjection {
        &self.projection
    }

    pub fn set_projection(&mut self, projection: CanvasProjection) {
        self.projection = projection;
    }

    /// Wind at canvas position `(x, y)`.
    pub fn query(&self, x: f64, y: f64) -> WindVector {
        self.query_geo(self.projection.to_geo(x, y))
    }

    /// Wind at a geographic position.
    pub fn query_geo(&self, point: GeoPoint) -> WindVector {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return FALLBACK_VECTOR;
        };
        let (fx, fy) = snapshot.header.grid_coords(point);
        interpolate(snapshot, fx, fy).unwrap_or(FALLBACK_VECTOR)
    }
}

/// Bilinear interpolation at fractional grid coordinates. The cell origin is
/// kept within `[0, nx-2] x [0, ny-2]`; a coordinate lying exactly on the last
/// row or column uses the neighbouring cell with weight 1 so nodes stay exact.
fn interpolate(snapshot: &VectorFieldSnapshot, fx: f64, fy: f64) -> Option<WindVector> {
    let nx = snapshot.header.nx;
    let ny = snapshot.header.ny;
    if !(fx.is_finite() && fy.is_finite()) || fx < 0.0 || fy < 0.0 {
        return None;
    }
    if fx > (nx - 1) as f64 || fy > (ny - 1) as f64 {
        return None;
    }

    let i0 = (fx.floor() as usize).min(nx - 2);
    let j0 = (fy.floor() as usize).min(ny - 2);
    let tx = fx - i0 as f64;
    let ty = fy - j0 as f64;

    let g00 = snapshot.node(i0, j0);
    let g10 = snapshot.node(i0 + 1, j0);
    let g01 = snapshot.node(i0, j0 + 1);
    let g11 = snapshot.node(i0 + 1, j0 + 1);

    let blend = |a: f64, b: f64, c: f64, d: f64| {
        a * (1.0 - tx) * (1.0 - ty) + b * tx * (1.0 - ty) + c * (1.0 - tx) * ty + d * tx * ty
    };

    Some(WindVector::new(
        blend(g00.u, g10.u, g01.u, g11.u),
        blend(g00.v, g10.v, g01.v, g11.v),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldHeader;
    use hazard_core::BoundingBox;
    use rstest::rstest;

    fn snapshot() -> VectorFieldSnapshot {
        // 3 columns x 2 rows, origin at (12N, 120E), 0.5 degree spacing.
        VectorFieldSnapshot {
            header: FieldHeader {
                origin_lng: 120.0,
                origin_lat: 12.0,
                d_lng: 0.5,
                d_lat: 0.5,
                nx: 3,
                ny: 2,
            },
            u: vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0],
            v: vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0],
        }
    }

    fn sampler() -> VectorFieldSampler {
        let projection =
            CanvasProjection::new(BoundingBox::new(12.0, 11.5, 121.0, 120.0), 100, 50);
        let mut sampler = VectorFieldSampler::new(projection);
        assert!(sampler.load(snapshot()));
        sampler
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 0)]
    #[case(2, 0)]
    #[case(0, 1)]
    #[case(2, 1)]
    fn grid_nodes_are_exact(#[case] i: usize, #[case] j: usize) {
        let sampler = sampler();
        let field = snapshot();
        let point = field.header.node_point(i, j);
        assert_eq!(sampler.query_geo(point), field.node(i, j));
    }

    #[test]
    fn cell_centre_is_the_mean_of_its_corners() {
        let sampler = sampler();
        let wind = sampler.query_geo(GeoPoint::new(11.75, 120.25));
        assert!((wind.u - 4.0).abs() < 1e-9);
        assert!((wind.v + 3.0).abs() < 1e-9);
    }

    #[test]
    fn canvas_query_goes_through_the_projection() {
        let sampler = sampler();
        // Canvas (50, 0) is (12N, 120.5E): node (1, 0).
        assert_eq!(sampler.query(50.0, 0.0), WindVector::new(2.0, -2.0));
    }

    #[rstest]
    #[case(GeoPoint::new(13.0, 120.5))]
    #[case(GeoPoint::new(11.0, 120.5))]
    #[case(GeoPoint::new(11.75, 119.9))]
    #[case(GeoPoint::new(11.75, 121.1))]
    fn outside_the_grid_returns_fallback(#[case] point: GeoPoint) {
        assert_eq!(sampler().query_geo(point), FALLBACK_VECTOR);
    }

    #[test]
    fn malformed_snapshot_falls_back() {
        let mut sampler = sampler();
        let mut broken = snapshot();
        broken.v.pop();
        assert!(!sampler.load(broken));
        assert!(!sampler.has_field());
        assert_eq!(sampler.query(10.0, 10.0), FALLBACK_VECTOR);
    }

    #[test]
    fn empty_sampler_returns_fallback() {
        let projection = CanvasProjection::new(BoundingBox::new(1.0, 0.0, 1.0, 0.0), 10, 10);
        let sampler = VectorFieldSampler::new(projection);
        assert_eq!(sampler.query(5.0, 5.0), FALLBACK_VECTOR);
    }
}
