//! Viewport sampling lattice.
//!
//! Turns a bounding box and an angular step into an ordered, capped list of
//! probe points. Latitudes stay half a degree off the poles, longitudes are
//! unwrapped across the antimeridian before stepping and wrapped back
//! afterwards.

use crate::geo::{BoundingBox, GeoPoint, normalize_lng};

/// Upper bound on points produced for a single scan.
pub const DEFAULT_MAX_POINTS: usize = 80;

const POLE_MARGIN_LAT: f64 = 89.5;
const DECIMALS: f64 = 10_000.0;
const STEP_EPSILON: f64 = 1e-9;

/// Parameters for [`sample_lattice`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatticeSpec {
    /// Angular step in degrees, applied to both axes.
    pub step_deg: f64,
    /// Maximum number of points returned.
    pub max_points: usize,
}

impl Default for LatticeSpec {
    fn default() -> Self {
        Self {
            step_deg: 0.5,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

fn round_fixed(value: f64) -> f64 {
    (value * DECIMALS).round() / DECIMALS
}

/// Inclusive `start..=end` sequence stepping by `step`.
///
/// Steps finer than the rounding precision are widened to it, so successive
/// values stay distinct and the sequence is at most one value per
/// `1 / DECIMALS` of span.
fn steps(start: f64, end: f64, step: f64) -> impl Iterator<Item = f64> {
    let step = step.max(DECIMALS.recip());
    let count = if start.is_finite() && end.is_finite() && start <= end {
        ((end - start) / step + STEP_EPSILON).floor() + 1.0
    } else {
        0.0
    };
    (0u64..)
        .map(|i| i as f64)
        .take_while(move |&i| i < count)
        .map(move |i| round_fixed(start + i * step))
}

/// First `limit` distinct values of a stepped sequence. Repeats are either
/// adjacent or, after a full turn of longitude, equal to the first value.
fn distinct(values: impl Iterator<Item = f64>, limit: usize) -> Vec<f64> {
    let same = |a: f64, b: f64| (a - b).abs() < STEP_EPSILON;
    let mut out: Vec<f64> = Vec::new();
    for value in values {
        if out.len() == limit {
            break;
        }
        let repeated = out.last().is_some_and(|&last| same(last, value))
            || out.first().is_some_and(|&first| same(first, value));
        if !repeated {
            out.push(value);
        }
    }
    out
}

fn latitude_steps(bbox: &BoundingBox, step: f64, limit: usize) -> Vec<f64> {
    let south = bbox.south.max(-POLE_MARGIN_LAT);
    let north = bbox.north.min(POLE_MARGIN_LAT);
    distinct(steps(south, north, step), limit)
}

fn longitude_steps(bbox: &BoundingBox, step: f64, limit: usize) -> Vec<f64> {
    let wrapped = steps(bbox.west, bbox.unwrapped_east(), step)
        .map(|lng| round_fixed(normalize_lng(lng)));
    distinct(wrapped, limit)
}

/// Build the row-major sample lattice for `bbox`.
///
/// Output is deterministic for identical input and silently truncated to
/// `spec.max_points`. Degenerate input (inverted latitudes, non-positive or
/// non-finite step) yields an empty list.
pub fn sample_lattice(bbox: &BoundingBox, spec: &LatticeSpec) -> Vec<GeoPoint> {
    let step = spec.step_deg;
    if !step.is_finite() || step <= 0.0 || spec.max_points == 0 {
        return Vec::new();
    }

    // No axis ever contributes more than `max_points` values to the output.
    let lats = latitude_steps(bbox, step, spec.max_points);
    if lats.is_empty() {
        return Vec::new();
    }
    let lngs = longitude_steps(bbox, step, spec.max_points);

    let mut points = Vec::with_capacity(spec.max_points.min(lats.len() * lngs.len()));
    'rows: for &lat in &lats {
        for &lng in &lngs {
            if points.len() == spec.max_points {
                break 'rows;
            }
            points.push(GeoPoint::new(lat, lng));
        }
    }
    points
}
