//! Actix Web server exposing the marker board, rescue controls and the wind
//! particle frame.
//!
//! The server runs on a dedicated thread so the engine loop never shares a
//! runtime with HTTP handling. Mutating requests travel to the engine as
//! [`EngineCommand`]s with a oneshot reply; read-only views come from the
//! shared snapshots the engine publishes.

use std::{net::SocketAddr, time::Duration};

use actix_web::{
    App, HttpResponse, HttpResponseBuilder, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use hazard_core::{BoundingBox, GeoPoint};
use serde::{Deserialize, Serialize};
use serde_json::to_string;
use tokio::sync::oneshot;
use tracing::error;
use uuid::Uuid;
use windfield::{SharedAdvector, encode_png, render_frame};

use crate::watch::{
    data::{CommandError, CommandReply, CommandSender, EngineCommand, SharedViews},
    overlay::{Marker, MarkerBoard},
    telemetry,
};

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) commands: CommandSender,
    pub(crate) board: MarkerBoard,
    pub(crate) views: SharedViews,
    pub(crate) advector: SharedAdvector,
}

#[derive(Default)]
/// Handle for the server thread.
pub(crate) struct WatchServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WatchServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Serialize)]
struct MarkersResponse {
    generation: u64,
    markers: Vec<Marker>,
}

#[derive(Deserialize)]
struct ViewportBody {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

#[derive(Deserialize)]
struct TriggerBody {
    lat: f64,
    lng: f64,
    reason: String,
}

#[derive(Serialize)]
struct AckResponse {
    id: Uuid,
    changed: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Spawn the server thread and return a handle that can stop it.
pub(crate) fn spawn_watch_server(bind: SocketAddr, state: ServerState) -> Result<WatchServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("marine-watch-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(routes)
            })
            .bind(bind)?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn watch server thread")?;
    Ok(WatchServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/markers", web::get().to(markers_handler))
        .route("/hazards", web::get().to(hazards_handler))
        .route("/viewport", web::post().to(viewport_handler))
        .route("/rescue", web::post().to(trigger_handler))
        .route("/rescue/confirm", web::post().to(confirm_handler))
        .route("/rescue/cancel", web::post().to(cancel_handler))
        .route("/rescue/state", web::get().to(rescue_state_handler))
        .route("/rescue/log", web::get().to(log_handler))
        .route("/rescue/log/{id}/ack", web::post().to(ack_handler))
        .route("/stream_rescue", web::get().to(stream_rescue_handler))
        .route("/wind.png", web::get().to(wind_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Forward a command to the engine and wait for its reply.
async fn dispatch<T>(
    state: &ServerState,
    build: impl FnOnce(CommandReply<T>) -> EngineCommand,
) -> Result<T, CommandError> {
    let (reply, rx) = oneshot::channel();
    state
        .commands
        .send(build(reply))
        .map_err(|_| CommandError::Failed("watch engine is not running".into()))?;
    rx.await
        .map_err(|_| CommandError::Failed("watch engine dropped the request".into()))?
}

fn respond<T: Serialize>(result: Result<T, CommandError>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(err) => error_response(err),
    }
}

fn error_response(err: CommandError) -> HttpResponse {
    let (mut builder, message): (HttpResponseBuilder, String) = match err {
        CommandError::Invalid(message) => (HttpResponse::BadRequest(), message),
        CommandError::Conflict(message) => (HttpResponse::Conflict(), message),
        CommandError::NotFound(message) => (HttpResponse::NotFound(), message),
        CommandError::Failed(message) => (HttpResponse::InternalServerError(), message),
    };
    builder.json(ErrorBody { error: message })
}

async fn markers_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(MarkersResponse {
        generation: state.views.generation(),
        markers: state.board.markers(),
    })
}

/// Return the latest applied scan.
async fn hazards_handler(state: web::Data<ServerState>) -> HttpResponse {
    let guard = match state.views.scan.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match guard.as_ref() {
        Some(report) => HttpResponse::Ok().json(report),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Move the map viewport. Subscribers (the engine) rescan asynchronously.
async fn viewport_handler(
    state: web::Data<ServerState>,
    body: web::Json<ViewportBody>,
) -> HttpResponse {
    let coords = [body.north, body.south, body.east, body.west];
    if coords.iter().any(|c| !c.is_finite()) || body.north <= body.south {
        return error_response(CommandError::Invalid(
            "viewport needs finite coordinates with north above south".into(),
        ));
    }
    let bounds = BoundingBox::new(body.north, body.south, body.east, body.west);
    if bounds.is_empty() {
        return error_response(CommandError::Invalid("viewport is empty".into()));
    }
    state.board.set_viewport(bounds);
    HttpResponse::Accepted().json(bounds)
}

async fn trigger_handler(
    state: web::Data<ServerState>,
    body: web::Json<TriggerBody>,
) -> HttpResponse {
    if !body.lat.is_finite() || !body.lng.is_finite() {
        return error_response(CommandError::Invalid("location must be finite".into()));
    }
    let TriggerBody { lat, lng, reason } = body.into_inner();
    let location = GeoPoint::new(lat, lng);
    respond(
        dispatch(&state, |reply| EngineCommand::Trigger {
            location,
            reason,
            reply,
        })
        .await,
    )
}

async fn confirm_handler(state: web::Data<ServerState>) -> HttpResponse {
    respond(dispatch(&state, |reply| EngineCommand::Confirm { reply }).await)
}

async fn cancel_handler(state: web::Data<ServerState>) -> HttpResponse {
    respond(dispatch(&state, |reply| EngineCommand::Cancel { reply }).await)
}

async fn rescue_state_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.views.escalation.lock() {
        Ok(view) => HttpResponse::Ok().json(&*view),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

async fn log_handler(state: web::Data<ServerState>) -> HttpResponse {
    respond(dispatch(&state, |reply| EngineCommand::ReadLog { reply }).await)
}

async fn ack_handler(state: web::Data<ServerState>, path: web::Path<Uuid>) -> HttpResponse {
    let id = path.into_inner();
    respond(
        dispatch(&state, |reply| EngineCommand::Acknowledge { id, reply })
            .await
            .map(|changed| AckResponse { id, changed }),
    )
}

/// Stream escalation snapshots as Server-Sent Events, one per change.
async fn stream_rescue_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(250));
        let mut last = None;
        let mut sequence: u64 = 0;
        loop {
            interval.tick().await;
            let snapshot = state
                .views
                .escalation
                .lock()
                .ok()
                .map(|view| view.clone());
            match snapshot {
                Some(view) if last.as_ref() != Some(&view) => {
                    match to_string(&view) {
                        Ok(json) => {
                            sequence += 1;
                            let mut sse_chunk = String::with_capacity(json.len() + 32);
                            sse_chunk.push_str("id: ");
                            sse_chunk.push_str(&sequence.to_string());
                            sse_chunk.push('\n');
                            sse_chunk.push_str("data: ");
                            sse_chunk.push_str(&json);
                            sse_chunk.push_str("\n\n");
                            last = Some(view);
                            yield Ok::<Bytes, actix_web::Error>(Bytes::from(sse_chunk));
                        }
                        Err(err) => {
                            let error_chunk = format!("event: error\ndata: {}\n\n", err);
                            yield Ok::<Bytes, actix_web::Error>(Bytes::from(error_chunk));
                        }
                    }
                }
                _ => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Render the current particle pool as a transparent PNG overlay.
async fn wind_handler(state: web::Data<ServerState>) -> HttpResponse {
    let frame = match state.advector.lock() {
        Ok(advector) => render_frame(&advector),
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match encode_png(&frame) {
        Ok(png) => HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .content_type("image/png")
            .body(png),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
