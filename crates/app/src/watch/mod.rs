//! Marine hazard watch: viewport scanning, hazard markers, the wind particle
//! overlay and rescue escalation, served over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Supervisor and the engine event loop.
//! - `scan`: One lattice → probe → classify cycle.
//! - `overlay`: Marker board and the generation-tracking overlay manager.
//! - `rescue`: Escalation state machine.
//! - `persist`: Remote-then-local rescue persistence.
//! - `server`: Actix Web endpoints.
//! - `data`: Commands and shared views passed between the server and engine.
//! - `telemetry`: Tracing subscriber and Prometheus recorder.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{
    DEFAULT_LOG_PATH, OneShotCliArgs, ScanConfig, TelemetryOptions, WatchCliArgs, WatchConfig,
};
/// Launch the watch engine with a ready-made configuration.
pub use pipeline::run;
pub use scan::run_once as scan_once;

pub(crate) use persist::{FileStore, LocalRescueLog};
pub(crate) use pipeline::current_thread_runtime;
pub(crate) use telemetry::install_subscriber;

mod config;
mod data;
mod overlay;
mod persist;
mod pipeline;
mod rescue;
mod scan;
mod server;
mod telemetry;
