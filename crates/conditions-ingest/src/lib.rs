//! Fetching of point conditions from the weather and marine sources.
//!
//! - `types`: the error every source reports.
//! - `source`: the source traits the probe is generic over.
//! - `open_meteo`: HTTP implementations of both sources.
//! - `probe`: windowed, failure-tolerant fetching over a lattice.
//! - `wind_grid`: builds a wind field snapshot for the particle layer.

pub mod open_meteo;
pub mod probe;
pub mod source;
pub mod types;
pub mod wind_grid;

pub use open_meteo::{OpenMeteoMarine, OpenMeteoWeather};
pub use probe::{BoundedFieldProbe, PointConditions, ProbeSettings};
pub use source::{MarineSource, WeatherSource};
pub use types::SourceError;
pub use wind_grid::{WindGrid, WindGridBuilder};
