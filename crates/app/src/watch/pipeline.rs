//! Watch engine supervisor and event loop.
//!
//! The loop owns the escalation state machine, the overlay manager and the
//! particle pool handle. Scans, rescue sends and wind-grid fetches run as
//! spawned tasks that report back through [`EngineEvent`]. Every report carries
//! the generation or attempt that produced it, so results that were superseded
//! while in flight are dropped instead of applied.

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use conditions_ingest::{BoundedFieldProbe, MarineSource, WeatherSource, WindGrid, WindGridBuilder};
use hazard_core::{BoundingBox, HazardThresholds, LatticeSpec};
use tokio::{
    runtime::{Builder, Runtime},
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use windfield::{
    AdvectorSettings, AnimationLoop, CanvasProjection, FieldError, ParticleAdvector,
    SharedAdvector, VectorFieldSnapshot,
};

use crate::watch::{
    config::WatchConfig,
    data::{CommandError, CommandSender, EngineCommand, SharedViews},
    overlay::{MarkerBoard, OverlayHost, OverlayManager, SubscriptionToken},
    persist::{
        DualPathPersister, FileStore, HttpRescueEndpoint, KeyValueStore, LocalRescueLog,
        PersistError, RemoteEndpoint, RescueDraft, RescueRequest,
    },
    rescue::{EscalationError, RescueEscalation, SendOrder},
    scan::{ScanReport, open_meteo_probe, run_scan},
    server::{ServerState, spawn_watch_server},
    telemetry,
};

/// Run the watch engine, restarting it after failures until Ctrl+C.
pub fn run(config: WatchConfig) -> Result<()> {
    let _telemetry_guard = telemetry::install_subscriber(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_engine_once(&config, shutdown.clone()) {
            Ok(EngineOutcome::Graceful) => break,
            Ok(EngineOutcome::Restart(reason)) => {
                attempt = attempt.saturating_add(1);
                warn!("Watch engine restarting (reason: {reason}), attempt #{attempt}");
                back_off(&shutdown);
            }
            Err(err) => {
                error!("Watch engine error: {err:?}");
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                attempt = attempt.saturating_add(1);
                back_off(&shutdown);
            }
        }
    }

    info!("Watch engine stopped");
    Ok(())
}

/// Result of a single engine run.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EngineOutcome {
    Graceful,
    Restart(&'static str),
}

/// Wait one second before the next attempt, still honouring Ctrl+C.
fn back_off(shutdown: &AtomicBool) {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(_) => {
            thread::sleep(Duration::from_secs(1));
            return;
        }
    };
    runtime.block_on(async {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    shutdown.store(true, Ordering::SeqCst);
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    });
}

pub(crate) fn current_thread_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

/// Wire sources, persistence, the HTTP server and the engine, then run the
/// loop until it finishes.
fn run_engine_once(config: &WatchConfig, shutdown: Arc<AtomicBool>) -> Result<EngineOutcome> {
    let runtime = current_thread_runtime()?;
    let engine_span = info_span!(
        "watch.engine",
        bind = %config.bind,
        remote = config.rescue_url.is_some(),
        log = %config.log_path.display(),
        step = config.scan.lattice.step_deg,
        window = config.scan.probe.window
    );
    let _engine_span_guard = engine_span.enter();

    let probe = Arc::new(open_meteo_probe(&config.scan)?);
    let log = runtime
        .block_on(LocalRescueLog::load(FileStore::new(config.log_path.clone())))
        .with_context(|| format!("Failed to load rescue log {}", config.log_path.display()))?;
    info!(entries = log.entries().len(), "Rescue log loaded");
    let persister = DualPathPersister::new(
        HttpRescueEndpoint::new(config.rescue_url.clone()),
        log,
        config.remote_timeout,
    );

    let field = match config.field_file.as_deref() {
        Some(path) => FieldSource::File(load_field_file(path)?),
        None => FieldSource::Fetch(WindGridBuilder {
            nx: config.wind_grid.0,
            ny: config.wind_grid.1,
            window: config.scan.probe.window,
            timeout: config.scan.probe.timeout,
        }),
    };

    let board = MarkerBoard::new();
    let views = SharedViews::new();
    let (engine, commands, inbox) = Engine::new(
        probe,
        persister,
        board.clone(),
        field,
        EngineSettings::from(config),
        views.clone(),
    );

    let server = spawn_watch_server(
        config.bind,
        ServerState {
            commands,
            board: board.clone(),
            views,
            advector: engine.advector(),
        },
    )?;
    if let Some(bounds) = config.initial_viewport {
        board.set_viewport(bounds);
    }

    let outcome = runtime.block_on(engine.run(inbox, shutdown));
    server.stop();
    Ok(outcome)
}

/// Read a snapshot from disk. An unreadable file is a configuration error; a
/// malformed one leaves the sampler on its fallback vector.
fn load_field_file(path: &Path) -> Result<Option<VectorFieldSnapshot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read field file {}", path.display()))?;
    match VectorFieldSnapshot::from_json(&raw) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(err) => {
            warn!("Field file {} rejected: {err}", path.display());
            Ok(None)
        }
    }
}

/// Where the particle field comes from.
pub(crate) enum FieldSource {
    /// Sample the weather source over each new viewport and on a timer.
    Fetch(WindGridBuilder),
    /// Fixed snapshot loaded at startup; only the projection follows the viewport.
    File(Option<VectorFieldSnapshot>),
}

impl FieldSource {
    fn refetches(&self) -> bool {
        matches!(self, FieldSource::Fetch(_))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EngineSettings {
    pub(crate) lattice: LatticeSpec,
    pub(crate) thresholds: HazardThresholds,
    pub(crate) tick: Duration,
    pub(crate) field_refresh: Duration,
    pub(crate) advector: AdvectorSettings,
    pub(crate) canvas: (u32, u32),
    pub(crate) frame_interval: Duration,
}

impl From<&WatchConfig> for EngineSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            lattice: config.scan.lattice,
            thresholds: config.scan.thresholds,
            tick: config.tick,
            field_refresh: config.field_refresh,
            advector: config.advector,
            canvas: config.canvas,
            frame_interval: config.frame_interval,
        }
    }
}

/// Completions reported by spawned engine tasks.
pub(crate) enum EngineEvent {
    Scanned {
        generation: u64,
        report: ScanReport,
    },
    Sent {
        attempt: u64,
        outcome: Result<RescueRequest, String>,
    },
    Field {
        generation: u64,
        bounds: BoundingBox,
        grid: Result<WindGrid, FieldError>,
    },
}

/// Receivers drained by [`Engine::run`].
pub(crate) struct EngineInbox {
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    viewport: mpsc::UnboundedReceiver<BoundingBox>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Canvas geometry used until the first viewport arrives.
fn standby_viewport() -> BoundingBox {
    BoundingBox::new(1.0, -1.0, 1.0, -1.0)
}

pub(crate) struct Engine<W, M, R, S> {
    probe: Arc<BoundedFieldProbe<W, M>>,
    persister: DualPathPersister<R, S>,
    escalation: RescueEscalation,
    overlay: OverlayManager<MarkerBoard>,
    subscription: Option<SubscriptionToken>,
    field: FieldSource,
    animation: AnimationLoop,
    settings: EngineSettings,
    views: SharedViews,
    viewport: Option<BoundingBox>,
    scan_generation: u64,
    field_generation: u64,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl<W, M, R, S> Engine<W, M, R, S>
where
    W: WeatherSource + 'static,
    M: MarineSource + 'static,
    R: RemoteEndpoint + 'static,
    S: KeyValueStore + 'static,
{
    pub(crate) fn new(
        probe: Arc<BoundedFieldProbe<W, M>>,
        persister: DualPathPersister<R, S>,
        board: MarkerBoard,
        field: FieldSource,
        settings: EngineSettings,
        views: SharedViews,
    ) -> (Self, CommandSender, EngineInbox) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (viewport_tx, viewport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let subscription = board.on_viewport_change(Arc::new(move |bounds| {
            let _ = viewport_tx.send(bounds);
        }));

        let (width, height) = settings.canvas;
        let advector: SharedAdvector = Arc::new(Mutex::new(ParticleAdvector::new(
            CanvasProjection::new(standby_viewport(), width, height),
            settings.advector,
        )));
        let animation = AnimationLoop::new(advector, settings.frame_interval);

        let engine = Self {
            probe,
            persister,
            escalation: RescueEscalation::new(),
            overlay: OverlayManager::new(board),
            subscription: Some(subscription),
            field,
            animation,
            settings,
            views,
            viewport: None,
            scan_generation: 0,
            field_generation: 0,
            events: event_tx,
        };
        let inbox = EngineInbox {
            commands: command_rx,
            viewport: viewport_rx,
            events: event_rx,
        };
        (engine, command_tx, inbox)
    }

    pub(crate) fn advector(&self) -> SharedAdvector {
        self.animation.advector()
    }

    /// Drive the engine until Ctrl+C or until every command sender is gone.
    pub(crate) async fn run(mut self, mut inbox: EngineInbox, shutdown: Arc<AtomicBool>) -> EngineOutcome {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; a countdown starts one period later.
        ticker.tick().await;
        let mut refresh = interval(self.settings.field_refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        refresh.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ctrl_c_armed = true;

        info!("Watch engine running");
        loop {
            tokio::select! {
                result = &mut ctrl_c, if ctrl_c_armed => {
                    ctrl_c_armed = false;
                    match result {
                        Ok(()) => {
                            info!("Shutdown requested");
                            shutdown.store(true, Ordering::SeqCst);
                            return EngineOutcome::Graceful;
                        }
                        Err(err) => warn!("Failed to listen for Ctrl+C: {err}"),
                    }
                }
                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return EngineOutcome::Restart("http server stopped"),
                },
                Some(bounds) = inbox.viewport.recv() => self.on_viewport(bounds),
                Some(event) = inbox.events.recv() => self.handle_event(event),
                _ = ticker.tick() => self.on_tick(),
                _ = refresh.tick(), if self.field.refetches() => self.refresh_field(),
            }
        }
    }

    fn on_viewport(&mut self, bounds: BoundingBox) {
        if bounds.is_empty() {
            warn!(?bounds, "Ignoring empty viewport");
            return;
        }
        debug!(?bounds, "Viewport changed; rescanning");
        self.viewport = Some(bounds);
        self.request_scan(bounds);
        self.refresh_field();
    }

    fn request_scan(&mut self, bounds: BoundingBox) {
        self.scan_generation += 1;
        let generation = self.scan_generation;
        let probe = self.probe.clone();
        let lattice = self.settings.lattice;
        let thresholds = self.settings.thresholds;
        let events = self.events.clone();
        tokio::spawn(async move {
            let report = run_scan(&probe, bounds, &lattice, &thresholds).await;
            let _ = events.send(EngineEvent::Scanned { generation, report });
        });
    }

    fn refresh_field(&mut self) {
        let Some(bounds) = self.viewport else {
            return;
        };
        self.field_generation += 1;
        let generation = self.field_generation;
        match &self.field {
            FieldSource::File(snapshot) => {
                let snapshot = snapshot.clone();
                self.apply_field(bounds, snapshot, "file");
            }
            FieldSource::Fetch(builder) => {
                let builder = *builder;
                let probe = self.probe.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let grid = builder.build(probe.weather(), &bounds).await;
                    let _ = events.send(EngineEvent::Field {
                        generation,
                        bounds,
                        grid,
                    });
                });
            }
        }
    }

    /// Swap the particle field and make sure the animation is running.
    fn apply_field(
        &mut self,
        bounds: BoundingBox,
        snapshot: Option<VectorFieldSnapshot>,
        outcome: &'static str,
    ) {
        let (width, height) = self.settings.canvas;
        let projection = CanvasProjection::new(bounds, width, height);
        let advector = self.animation.advector();
        let accepted = match advector.lock() {
            Ok(mut advector) => advector.replace_field(snapshot, projection),
            Err(_) => {
                warn!("Particle pool poisoned; field not applied");
                return;
            }
        };
        metrics::counter!("marine_field_refresh_total", "outcome" => outcome).increment(1);
        debug!(accepted, outcome, "Wind field applied");
        self.animation.start();
    }

    fn on_tick(&mut self) {
        if let Some(order) = self.escalation.tick() {
            info!(attempt = order.attempt, "Countdown expired; sending rescue request");
            self.spawn_send(order);
        }
        self.publish_escalation();
    }

    fn spawn_send(&self, order: SendOrder) {
        let probe = self.probe.clone();
        let persister = self.persister.clone();
        let events = self.events.clone();
        let span = info_span!("rescue.send", attempt = order.attempt);
        tokio::spawn(
            async move {
                let conditions = probe.conditions(order.location).await;
                let draft = RescueDraft {
                    location: order.location,
                    reason: order.reason,
                    conditions,
                };
                let outcome = persister.persist(draft).await.map_err(|err| err.to_string());
                let _ = events.send(EngineEvent::Sent {
                    attempt: order.attempt,
                    outcome,
                });
            }
            .instrument(span),
        );
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Trigger {
                location,
                reason,
                reply,
            } => {
                let result = match self.escalation.trigger(location, &reason) {
                    Ok(()) => {
                        info!(
                            lat = location.lat(),
                            lng = location.lng(),
                            "Rescue request pending confirmation"
                        );
                        Ok(self.escalation.view())
                    }
                    Err(err) => Err(refusal(err)),
                };
                self.publish_escalation();
                let _ = reply.send(result);
            }
            EngineCommand::Confirm { reply } => {
                let result = match self.escalation.confirm() {
                    Ok(order) => {
                        info!(attempt = order.attempt, "Rescue request confirmed");
                        self.spawn_send(order);
                        Ok(self.escalation.view())
                    }
                    Err(err) => Err(refusal(err)),
                };
                self.publish_escalation();
                let _ = reply.send(result);
            }
            EngineCommand::Cancel { reply } => {
                let result = match self.escalation.cancel() {
                    Ok(()) => {
                        info!("Rescue request cancelled");
                        Ok(self.escalation.view())
                    }
                    Err(err) => Err(refusal(err)),
                };
                self.publish_escalation();
                let _ = reply.send(result);
            }
            EngineCommand::ReadLog { reply } => {
                let persister = self.persister.clone();
                tokio::spawn(async move {
                    let _ = reply.send(Ok(persister.entries().await));
                });
            }
            EngineCommand::Acknowledge { id, reply } => {
                let persister = self.persister.clone();
                tokio::spawn(async move {
                    let result = match persister.acknowledge(id).await {
                        Ok(changed) => Ok(changed),
                        Err(err @ PersistError::NotFound(_)) => {
                            Err(CommandError::NotFound(err.to_string()))
                        }
                        Err(err) => Err(CommandError::Failed(err.to_string())),
                    };
                    let _ = reply.send(result);
                });
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Scanned { generation, report } => {
                if generation != self.scan_generation {
                    debug!(generation, current = self.scan_generation, "Dropping stale scan result");
                    return;
                }
                let marker_generation = self.overlay.replace(&report.flags);
                self.views.generation.store(marker_generation, Ordering::SeqCst);
                if let Ok(mut latest) = self.views.scan.lock() {
                    *latest = Some(report);
                }
            }
            EngineEvent::Sent { attempt, outcome } => {
                if let Err(message) = &outcome {
                    error!(attempt, "Rescue request not recorded: {message}");
                }
                let outcome = outcome.map(|request| (request.id, request.remote_ack));
                if !self.escalation.complete(attempt, outcome) {
                    debug!(attempt, "Ignoring completion of a superseded send");
                }
                self.publish_escalation();
            }
            EngineEvent::Field {
                generation,
                bounds,
                grid,
            } => {
                if generation != self.field_generation {
                    debug!(generation, current = self.field_generation, "Dropping stale wind grid");
                    return;
                }
                match grid {
                    Ok(WindGrid {
                        snapshot,
                        fallback_nodes,
                    }) => {
                        if fallback_nodes > 0 {
                            warn!(fallback_nodes, "Wind nodes fell back to the default vector");
                        }
                        self.apply_field(bounds, Some(snapshot), "fetched");
                    }
                    Err(err) => {
                        warn!("Wind grid rejected: {err}");
                        self.apply_field(bounds, None, "failed");
                    }
                }
            }
        }
    }

    fn publish_escalation(&self) {
        if let Ok(mut view) = self.views.escalation.lock() {
            *view = self.escalation.view();
        }
    }
}

impl<W, M, R, S> Drop for Engine<W, M, R, S> {
    fn drop(&mut self) {
        if let Some(token) = self.subscription.take() {
            self.overlay.host().unsubscribe(token);
        }
    }
}

fn refusal(err: EscalationError) -> CommandError {
    match err {
        EscalationError::EmptyReason => CommandError::Invalid(err.to_string()),
        EscalationError::CoolingDown { .. } | EscalationError::NotPending => {
            CommandError::Conflict(err.to_string())
        }
    }
}
