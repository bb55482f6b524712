//! Geometry, sampling and hazard rules shared by the ingest, wind-field and
//! application crates. Nothing in here performs I/O.

pub mod classifier;
pub mod conditions;
pub mod geo;
pub mod lattice;

pub use classifier::{HazardFlag, HazardThresholds, RawMetrics, classify, classify_all};
pub use conditions::{MarineReading, ProbeResult, WeatherReading};
pub use geo::{BoundingBox, GeoPoint};
pub use lattice::{DEFAULT_MAX_POINTS, LatticeSpec, sample_lattice};
