//! Tracing subscriber, Prometheus recorder and thread helpers.

use std::{io, panic, path::Path, sync::OnceLock, thread, time::Duration};

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{Subscriber, warn};
use tracing_chrome::{ChromeLayer, ChromeLayerBuilder, FlushGuard, TraceStyle};
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    prelude::*,
    registry::LookupSpan,
};

use crate::watch::config::TelemetryOptions;

const UPKEEP_PERIOD: Duration = Duration::from_secs(5);

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Keeps the subscriber installed on the current thread and flushes the
/// Chrome trace on drop.
pub(crate) struct SubscriberGuard {
    _dispatch: tracing::subscriber::DefaultGuard,
    _chrome_flush: Option<FlushGuard>,
}

/// Install the global metrics recorder once and return its handle.
pub(crate) fn init_metrics_recorder() -> &'static PrometheusHandle {
    RECORDER.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).expect("metrics recorder already installed");
        describe_metrics();

        let upkeep = handle.clone();
        if let Err(err) = spawn_thread("prometheus-upkeep", move || {
            loop {
                thread::sleep(UPKEEP_PERIOD);
                upkeep.run_upkeep();
            }
        }) {
            warn!("Prometheus upkeep thread not started: {err}");
        }
        handle
    })
}

pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    RECORDER.get()
}

fn describe_metrics() {
    describe_histogram!("marine_scan_seconds", Unit::Seconds, "Duration of one viewport scan");
    describe_counter!("marine_scan_points_total", "Lattice points sent to the probe");
    describe_counter!(
        "marine_probe_dropped_points_total",
        "Points dropped for a failed, late or incomplete fetch"
    );
    describe_gauge!("marine_hazard_flags", "Hazard flags in the latest scan");
    describe_gauge!("marine_marker_generation", "Marker generation on the board");
    describe_counter!(
        "marine_rescue_persisted_total",
        "Rescue requests written to the local log, by remote acknowledgement"
    );
    describe_counter!(
        "marine_rescue_local_failures_total",
        "Rescue requests whose local log write failed"
    );
    describe_histogram!(
        "marine_particle_frame_seconds",
        Unit::Seconds,
        "Time spent advancing the particle pool by one frame"
    );
    describe_counter!("marine_field_refresh_total", "Wind field replacements by outcome");
}

/// Install the subscriber for the current thread. Chrome tracing wins over
/// tokio-console when both are requested.
pub(crate) fn install_subscriber(opts: &TelemetryOptions) -> SubscriberGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (chrome, chrome_flush) = match opts.chrome_trace_path.as_deref() {
        None => (None, None),
        Some(path) => match chrome_layer(path) {
            Ok((layer, flush)) => (Some(layer), Some(flush)),
            Err(err) => {
                eprintln!("chrome trace disabled, cannot write {}: {err}", path.display());
                (None, None)
            }
        },
    };

    let wants_console = opts.enable_tokio_console && chrome.is_none();
    let console = if wants_console {
        // Spawning the console layer panics on builds without `tokio_unstable`.
        panic::catch_unwind(|| {
            console_subscriber::ConsoleLayer::builder()
                .with_default_env()
                .spawn()
        })
        .ok()
    } else {
        None
    };
    let console_unavailable = wants_console && console.is_none();
    let console_shadowed = opts.enable_tokio_console && chrome.is_some();

    let subscriber = tracing_subscriber::registry()
        .with(console)
        .with(chrome.map(|layer| layer.with_filter(filter_fn(|meta| meta.is_span()))))
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default());
    let dispatch = tracing::subscriber::set_default(subscriber);

    if console_unavailable {
        warn!("tokio-console needs a `tokio_unstable` build; continuing without it");
    }
    if console_shadowed {
        warn!("--chrome-trace and --tokio-console both set; only the chrome trace is recorded");
    }

    SubscriberGuard {
        _dispatch: dispatch,
        _chrome_flush: chrome_flush,
    }
}

/// Spawn a named thread that logs through the caller's dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(Clone::clone);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn chrome_layer<S>(path: &Path) -> io::Result<(ChromeLayer<S>, FlushGuard)>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    let writer = std::fs::File::create(path)?;
    Ok(ChromeLayerBuilder::new()
        .writer(writer)
        .include_args(true)
        .trace_style(TraceStyle::Threaded)
        .build())
}
