use hazard_core::{BoundingBox, GeoPoint};

/// Equirectangular mapping between the viewport and a pixel canvas.
/// Canvas origin is the north-west corner, y grows southward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasProjection {
    pub bounds: BoundingBox,
    pub width: u32,
    pub height: u32,
}

impl CanvasProjection {
    pub fn new(bounds: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            bounds,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn to_geo(&self, x: f64, y: f64) -> GeoPoint {
        let lng = self.bounds.west + x / self.width as f64 * self.bounds.lng_span();
        let lat = self.bounds.north - y / self.height as f64 * self.bounds.lat_span();
        GeoPoint::new(lat, lng)
    }

    pub fn to_canvas(&self, point: GeoPoint) -> (f64, f64) {
        let lng_offset = (point.lng() - self.bounds.west).rem_euclid(360.0);
        let x = lng_offset / self.bounds.lng_span() * self.width as f64;
        let y = (self.bounds.north - point.lat()) / self.bounds.lat_span() * self.height as f64;
        (x, y)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_and_geo_invert_each_other() {
        let projection = CanvasProjection::new(BoundingBox::new(10.0, 8.0, 126.0, 124.0), 200, 100);
        let point = projection.to_geo(50.0, 25.0);
        assert!((point.lng() - 124.5).abs() < 1e-9);
        assert!((point.lat() - 9.5).abs() < 1e-9);
        let (x, y) = projection.to_canvas(point);
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 25.0).abs() < 1e-9);
    }

    #[test]
    fn projection_wraps_across_the_antimeridian() {
        let projection = CanvasProjection::new(BoundingBox::new(1.0, -1.0, -170.0, 170.0), 200, 20);
        let point = projection.to_geo(150.0, 10.0);
        assert!((point.lng() - (-175.0)).abs() < 1e-9);
        let (x, _) = projection.to_canvas(GeoPoint::new(0.0, -175.0));
        assert!((x - 150.0).abs() < 1e-9);
    }
}
