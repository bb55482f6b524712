use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use hazard_core::GeoPoint;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::watch::{
    persist::RescueRequest,
    rescue::{EscalationView, RescueEscalation},
    scan::ScanReport,
};

/// Reason an engine command was refused, mapped to an HTTP status by the server.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CommandError {
    Invalid(String),
    Conflict(String),
    NotFound(String),
    Failed(String),
}

pub(crate) type CommandReply<T> = oneshot::Sender<Result<T, CommandError>>;

/// Operator requests forwarded from HTTP handlers to the engine loop.
pub(crate) enum EngineCommand {
    Trigger {
        location: GeoPoint,
        reason: String,
        reply: CommandReply<EscalationView>,
    },
    Confirm {
        reply: CommandReply<EscalationView>,
    },
    Cancel {
        reply: CommandReply<EscalationView>,
    },
    ReadLog {
        reply: CommandReply<Vec<RescueRequest>>,
    },
    Acknowledge {
        id: Uuid,
        reply: CommandReply<bool>,
    },
}

pub(crate) type CommandSender = mpsc::UnboundedSender<EngineCommand>;
/// Latest applied scan, `None` before the first one completes.
pub(crate) type SharedScan = Arc<Mutex<Option<ScanReport>>>;
pub(crate) type SharedEscalation = Arc<Mutex<EscalationView>>;

/// Read-only snapshots published by the engine for the HTTP handlers.
#[derive(Clone)]
pub(crate) struct SharedViews {
    pub(crate) scan: SharedScan,
    pub(crate) escalation: SharedEscalation,
    /// Marker generation currently on the board.
    pub(crate) generation: Arc<AtomicU64>,
}

impl SharedViews {
    pub(crate) fn new() -> Self {
        Self {
            scan: Arc::new(Mutex::new(None)),
            escalation: Arc::new(Mutex::new(RescueEscalation::new().view())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
