//! Configuration parsing for the watch engine and the one-shot commands.
//!
//! Clap structs describe the raw flags; `TryFrom` conversions validate them
//! into the config structs the rest of the crate consumes.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use conditions_ingest::{
    ProbeSettings,
    open_meteo::{DEFAULT_MARINE_URL, DEFAULT_WEATHER_URL},
};
use hazard_core::{BoundingBox, HazardThresholds, LatticeSpec};
use windfield::AdvectorSettings;

pub const DEFAULT_LOG_PATH: &str = "marine_rescue_log.json";

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and runtime inspection.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing engine spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Enable the Tokio console subscriber for live task inspection.
    pub enable_tokio_console: bool,
}

/// Everything a scan needs: where to fetch and how to judge the result.
#[derive(Clone, Debug)]
pub struct ScanSettings {
    pub weather_url: String,
    pub marine_url: String,
    pub lattice: LatticeSpec,
    pub probe: ProbeSettings,
    pub thresholds: HazardThresholds,
}

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub scan: ScanSettings,
    /// Remote rescue endpoint; `None` keeps rescue records local only.
    pub rescue_url: Option<String>,
    pub remote_timeout: Duration,
    /// Period of the countdown/cooldown tick.
    pub tick: Duration,
    pub wind_grid: (usize, usize),
    pub field_refresh: Duration,
    /// Snapshot loaded from disk instead of fetching the wind grid.
    pub field_file: Option<PathBuf>,
    pub advector: AdvectorSettings,
    pub canvas: (u32, u32),
    pub frame_interval: Duration,
    pub log_path: PathBuf,
    pub bind: SocketAddr,
    pub initial_viewport: Option<BoundingBox>,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub bounds: BoundingBox,
    pub scan: ScanSettings,
}

/// Source and lattice flags shared by `watch` and `scan`.
#[derive(Debug, Args)]
pub struct ScanCliArgs {
    /// Forecast endpoint queried for wind and precipitation.
    #[arg(long = "weather-url", env = "MARINE_WEATHER_URL", default_value = DEFAULT_WEATHER_URL)]
    pub weather_url: String,
    /// Marine endpoint queried for wave height.
    #[arg(long = "marine-url", env = "MARINE_MARINE_URL", default_value = DEFAULT_MARINE_URL)]
    pub marine_url: String,
    /// Lattice step in degrees.
    #[arg(long = "step", value_name = "DEG", default_value_t = 0.5)]
    pub step: f64,
    /// Maximum number of lattice points per scan.
    #[arg(long = "max-points", value_name = "N", default_value_t = hazard_core::DEFAULT_MAX_POINTS)]
    pub max_points: usize,
    /// Points fetched concurrently.
    #[arg(long = "window", value_name = "N", default_value_t = 5)]
    pub window: usize,
    /// Timeout for each source call.
    #[arg(long = "probe-timeout-secs", value_name = "SECS", default_value_t = 8)]
    pub probe_timeout_secs: u64,
    /// Wind speed threshold (km/h).
    #[arg(long = "wind-threshold", value_name = "KMH", default_value_t = 40.0)]
    pub wind_threshold: f64,
    /// Gust threshold (km/h).
    #[arg(long = "gust-threshold", value_name = "KMH", default_value_t = 60.0)]
    pub gust_threshold: f64,
    /// Wave height threshold (m).
    #[arg(long = "wave-threshold", value_name = "M", default_value_t = 2.5)]
    pub wave_threshold: f64,
    /// Precipitation threshold (mm).
    #[arg(long = "rain-threshold", value_name = "MM", default_value_t = 10.0)]
    pub rain_threshold: f64,
}

/// CLI arguments accepted by the `watch` subcommand.
#[derive(Debug, Args)]
pub struct WatchCliArgs {
    #[command(flatten)]
    pub scan: ScanCliArgs,
    /// Remote rescue endpoint. Requests stay local when unset.
    #[arg(long = "rescue-url", env = "MARINE_RESCUE_URL", value_name = "URL")]
    pub rescue_url: Option<String>,
    /// Timeout for the remote rescue submission.
    #[arg(long = "remote-timeout-secs", value_name = "SECS", default_value_t = 5)]
    pub remote_timeout_secs: u64,
    /// Countdown and cooldown tick period.
    #[arg(long = "tick-ms", value_name = "MS", default_value_t = 1000)]
    pub tick_ms: u64,
    /// Wind grid columns.
    #[arg(long = "wind-grid-x", value_name = "N", default_value_t = 9)]
    pub wind_grid_x: usize,
    /// Wind grid rows.
    #[arg(long = "wind-grid-y", value_name = "N", default_value_t = 7)]
    pub wind_grid_y: usize,
    /// Seconds between wind field refreshes.
    #[arg(long = "field-refresh-secs", value_name = "SECS", default_value_t = 120)]
    pub field_refresh_secs: u64,
    /// Load the wind field from a JSON snapshot instead of fetching it.
    #[arg(long = "field-file", value_name = "PATH")]
    pub field_file: Option<PathBuf>,
    /// Number of animated particles.
    #[arg(long = "particles", value_name = "N", default_value_t = 600)]
    pub particles: usize,
    /// Canvas pixels moved per m/s per frame.
    #[arg(long = "velocity-scale", value_name = "SCALE", default_value_t = 0.6)]
    pub velocity_scale: f64,
    /// Particle lifetime in frames.
    #[arg(long = "max-age", value_name = "FRAMES", default_value_t = 80)]
    pub max_age: u32,
    /// Canvas width in pixels.
    #[arg(long = "canvas-width", value_name = "PX", default_value_t = 960)]
    pub canvas_width: u32,
    /// Canvas height in pixels.
    #[arg(long = "canvas-height", value_name = "PX", default_value_t = 540)]
    pub canvas_height: u32,
    /// Animation frame period.
    #[arg(long = "frame-ms", value_name = "MS", default_value_t = 40)]
    pub frame_ms: u64,
    /// Local rescue log file.
    #[arg(long = "log-file", value_name = "PATH", default_value = DEFAULT_LOG_PATH)]
    pub log_file: PathBuf,
    /// HTTP bind address.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub bind: String,
    /// Initial viewport as `north,south,east,west`.
    #[arg(long = "viewport", value_name = "N,S,E,W", allow_hyphen_values = true, value_parser = parse_bounds)]
    pub viewport: Option<BoundingBox>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Enable the Tokio console instrumentation server.
    #[arg(long = "tokio-console", action = clap::ArgAction::SetTrue)]
    pub tokio_console: bool,
}

/// CLI arguments accepted by the one-shot `scan` subcommand.
#[derive(Debug, Args)]
pub struct OneShotCliArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub north: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub south: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub east: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub west: f64,
    #[command(flatten)]
    pub scan: ScanCliArgs,
}

/// Parse `north,south,east,west`.
pub fn parse_bounds(raw: &str) -> Result<BoundingBox, String> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("invalid coordinate in `{raw}`: {err}"))?;
    match values.as_slice() {
        &[north, south, east, west] => Ok(BoundingBox::new(north, south, east, west)),
        _ => Err(format!("expected 4 comma-separated values, got {}", values.len())),
    }
}

fn validate_bounds(bounds: &BoundingBox) -> Result<()> {
    let coords = [bounds.north, bounds.south, bounds.east, bounds.west];
    if coords.iter().any(|c| !c.is_finite()) {
        bail!("Viewport coordinates must be finite");
    }
    if bounds.north <= bounds.south {
        bail!("Viewport north ({}) must be above south ({})", bounds.north, bounds.south);
    }
    Ok(())
}

impl TryFrom<ScanCliArgs> for ScanSettings {
    type Error = anyhow::Error;

    fn try_from(args: ScanCliArgs) -> Result<Self> {
        if !args.step.is_finite() || args.step <= 0.0 {
            bail!("--step must be a positive number of degrees");
        }
        if args.max_points == 0 {
            bail!("--max-points must be at least 1");
        }
        if args.window == 0 {
            bail!("--window must be at least 1");
        }
        if args.probe_timeout_secs == 0 {
            bail!("--probe-timeout-secs must be at least 1");
        }
        let thresholds = HazardThresholds {
            wind_speed: args.wind_threshold,
            wind_gust: args.gust_threshold,
            wave_height: args.wave_threshold,
            precipitation: args.rain_threshold,
        };
        let levels = [
            thresholds.wind_speed,
            thresholds.wind_gust,
            thresholds.wave_height,
            thresholds.precipitation,
        ];
        if levels.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            bail!("Hazard thresholds must be positive numbers");
        }
        if thresholds.wind_gust < thresholds.wind_speed {
            bail!(
                "--gust-threshold ({}) must not be below --wind-threshold ({})",
                thresholds.wind_gust,
                thresholds.wind_speed
            );
        }

        Ok(Self {
            weather_url: args.weather_url,
            marine_url: args.marine_url,
            lattice: LatticeSpec {
                step_deg: args.step,
                max_points: args.max_points,
            },
            probe: ProbeSettings {
                window: args.window,
                timeout: Duration::from_secs(args.probe_timeout_secs),
            },
            thresholds,
        })
    }
}

impl TryFrom<WatchCliArgs> for WatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: WatchCliArgs) -> Result<Self> {
        let scan = ScanSettings::try_from(args.scan)?;

        if args.tick_ms == 0 || args.frame_ms == 0 {
            bail!("--tick-ms and --frame-ms must be at least 1");
        }
        if args.wind_grid_x < 2 || args.wind_grid_y < 2 {
            bail!("Wind grid must be at least 2x2");
        }
        if args.field_refresh_secs == 0 {
            bail!("--field-refresh-secs must be at least 1");
        }
        if args.canvas_width == 0 || args.canvas_height == 0 {
            bail!("Canvas dimensions must be positive");
        }
        if args.max_age == 0 {
            bail!("--max-age must be at least 1");
        }
        if !args.velocity_scale.is_finite() || args.velocity_scale <= 0.0 {
            bail!("--velocity-scale must be positive");
        }
        if let Some(bounds) = args.viewport.as_ref() {
            validate_bounds(bounds)?;
        }
        let bind: SocketAddr = args
            .bind
            .parse()
            .with_context(|| format!("--bind `{}` is not a socket address", args.bind))?;
        let rescue_url = args.rescue_url.filter(|url| !url.trim().is_empty());

        Ok(Self {
            scan,
            rescue_url,
            remote_timeout: Duration::from_secs(args.remote_timeout_secs.max(1)),
            tick: Duration::from_millis(args.tick_ms),
            wind_grid: (args.wind_grid_x, args.wind_grid_y),
            field_refresh: Duration::from_secs(args.field_refresh_secs),
            field_file: args.field_file,
            advector: AdvectorSettings {
                particle_count: args.particles,
                velocity_scale: args.velocity_scale,
                max_age: args.max_age,
            },
            canvas: (args.canvas_width, args.canvas_height),
            frame_interval: Duration::from_millis(args.frame_ms),
            log_path: args.log_file,
            bind,
            initial_viewport: args.viewport,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                enable_tokio_console: args.tokio_console,
            },
        })
    }
}

impl TryFrom<OneShotCliArgs> for ScanConfig {
    type Error = anyhow::Error;

    fn try_from(args: OneShotCliArgs) -> Result<Self> {
        let bounds = BoundingBox::new(args.north, args.south, args.east, args.west);
        validate_bounds(&bounds)?;
        Ok(Self {
            bounds,
            scan: ScanSettings::try_from(args.scan)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser)]
    struct WatchHarness {
        #[command(flatten)]
        args: WatchCliArgs,
    }

    #[derive(Parser)]
    struct ScanHarness {
        #[command(flatten)]
        args: OneShotCliArgs,
    }

    fn watch(extra: &[&str]) -> Result<WatchConfig> {
        let argv = std::iter::once("watch").chain(extra.iter().copied());
        WatchConfig::try_from(WatchHarness::try_parse_from(argv)?.args)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = watch(&[]).expect("defaults are valid");
        assert_eq!(config.scan.lattice, LatticeSpec::default());
        assert_eq!(config.scan.probe.window, 5);
        assert_eq!(config.scan.probe.timeout, Duration::from_secs(8));
        assert_eq!(config.scan.thresholds, HazardThresholds::default());
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.wind_grid, (9, 7));
        assert_eq!(config.advector, AdvectorSettings::default());
        assert_eq!(config.canvas, (960, 540));
        assert_eq!(config.log_path, PathBuf::from(DEFAULT_LOG_PATH));
        assert_eq!(config.bind.port(), 8080);
        assert!(config.initial_viewport.is_none());
    }

    #[test]
    fn viewport_accepts_negative_coordinates() {
        let config = watch(&["--viewport", "-8,-10,-170,175"]).expect("valid viewport");
        let bounds = config.initial_viewport.expect("viewport set");
        assert_eq!(bounds, BoundingBox::new(-8.0, -10.0, -170.0, 175.0));
        assert!(bounds.crosses_antimeridian());
    }

    #[rstest]
    #[case(&["--window", "0"])]
    #[case(&["--step", "0"])]
    #[case(&["--max-points", "0"])]
    #[case(&["--gust-threshold", "30"])]
    #[case(&["--wind-grid-x", "1"])]
    #[case(&["--viewport", "8,10,126,124"])]
    #[case(&["--bind", "nowhere"])]
    fn invalid_flags_are_rejected(#[case] extra: &[&str]) {
        assert!(watch(extra).is_err());
    }

    #[test]
    fn one_shot_scan_parses_bounds() {
        let harness = ScanHarness::try_parse_from([
            "scan", "--north", "10", "--south", "8", "--east", "126", "--west", "124",
        ])
        .expect("parse");
        let config = ScanConfig::try_from(harness.args).expect("valid");
        assert_eq!(config.bounds, BoundingBox::new(10.0, 8.0, 126.0, 124.0));
    }

    #[test]
    fn parse_bounds_rejects_wrong_arity() {
        assert!(parse_bounds("1,2,3").is_err());
        assert!(parse_bounds("a,b,c,d").is_err());
    }
}
