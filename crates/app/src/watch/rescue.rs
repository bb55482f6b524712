//! Rescue escalation state machine.
//!
//! One authoritative [`EscalationState`] decides every transition. Timer ticks,
//! confirmations and cancellations all go through `&mut self`, so an
//! auto-confirm can never fire after a cancel has been applied.

use hazard_core::GeoPoint;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Ticks between a trigger and the automatic send.
pub const COUNTDOWN_TICKS: u32 = 10;
/// Ticks after a recorded request before a new one may be triggered.
pub const COOLDOWN_TICKS: u32 = 10;

#[derive(Clone, Debug, PartialEq)]
pub enum EscalationState {
    Idle,
    PendingConfirm {
        location: GeoPoint,
        reason: String,
        countdown: u32,
    },
    Sending {
        attempt: u64,
        location: GeoPoint,
        reason: String,
    },
    CooldownActive {
        remaining: u32,
    },
}

impl EscalationState {
    pub fn label(&self) -> &'static str {
        match self {
            EscalationState::Idle => "idle",
            EscalationState::PendingConfirm { .. } => "pending_confirm",
            EscalationState::Sending { .. } => "sending",
            EscalationState::CooldownActive { .. } => "cooldown",
        }
    }
}

/// Instruction to persist a rescue request. `attempt` ties the completion
/// back to the send that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct SendOrder {
    pub attempt: u64,
    pub location: GeoPoint,
    pub reason: String,
}

/// Result of the last send, shown to the operator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The request is in the local log. `remote_ack` tells whether the server
    /// also received it.
    Recorded { id: Uuid, remote_ack: bool },
    /// The local log write failed; the request was not recorded.
    Failed { message: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum EscalationError {
    #[error("rescue requests are cooling down ({remaining} ticks left)")]
    CoolingDown { remaining: u32 },
    #[error("no rescue request is awaiting confirmation")]
    NotPending,
    #[error("a rescue request needs a reason")]
    EmptyReason,
}

/// Serializable snapshot for the HTTP surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EscalationView {
    pub state: &'static str,
    pub countdown: Option<u32>,
    pub cooldown_remaining: Option<u32>,
    pub location: Option<GeoPoint>,
    pub reason: Option<String>,
    pub notice: Option<Notice>,
}

#[derive(Debug)]
pub struct RescueEscalation {
    state: EscalationState,
    next_attempt: u64,
    notice: Option<Notice>,
}

impl Default for RescueEscalation {
    fn default() -> Self {
        Self::new()
    }
}

impl RescueEscalation {
    pub fn new() -> Self {
        Self {
            state: EscalationState::Idle,
            next_attempt: 0,
            notice: None,
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Open a confirmation window. A pending or in-flight request is replaced
    /// rather than stacked.
    pub fn trigger(&mut self, location: GeoPoint, reason: &str) -> Result<(), EscalationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EscalationError::EmptyReason);
        }
        if let EscalationState::CooldownActive { remaining } = self.state {
            return Err(EscalationError::CoolingDown { remaining });
        }
        self.state = EscalationState::PendingConfirm {
            location,
            reason: reason.to_string(),
            countdown: COUNTDOWN_TICKS,
        };
        self.notice = None;
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<SendOrder, EscalationError> {
        self.begin_send().ok_or(EscalationError::NotPending)
    }

    /// Abandon the pending request. Only valid while awaiting confirmation.
    pub fn cancel(&mut self) -> Result<(), EscalationError> {
        match self.state {
            EscalationState::PendingConfirm { .. } => {
                self.state = EscalationState::Idle;
                Ok(())
            }
            _ => Err(EscalationError::NotPending),
        }
    }

    /// Advance one time unit. Returns a send order when the countdown runs out.
    pub fn tick(&mut self) -> Option<SendOrder> {
        match &mut self.state {
            EscalationState::PendingConfirm { countdown, .. } => {
                *countdown = countdown.saturating_sub(1);
                if *countdown == 0 {
                    return self.begin_send();
                }
            }
            EscalationState::CooldownActive { remaining } => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.state = EscalationState::Idle;
                }
            }
            EscalationState::Idle | EscalationState::Sending { .. } => {}
        }
        None
    }

    /// Apply the outcome of send `attempt`. Outcomes of superseded attempts
    /// are ignored; returns whether the outcome was applied.
    pub fn complete(&mut self, attempt: u64, outcome: Result<(Uuid, bool), String>) -> bool {
        match self.state {
            EscalationState::Sending { attempt: current, .. } if current == attempt => {}
            _ => return false,
        }
        match outcome {
            Ok((id, remote_ack)) => {
                self.state = EscalationState::CooldownActive {
                    remaining: COOLDOWN_TICKS,
                };
                self.notice = Some(Notice::Recorded { id, remote_ack });
            }
            Err(message) => {
                self.state = EscalationState::Idle;
                self.notice = Some(Notice::Failed { message });
            }
        }
        true
    }

    pub fn view(&self) -> EscalationView {
        let mut view = EscalationView {
            state: self.state.label(),
            notice: self.notice.clone(),
            ..EscalationView::default()
        };
        match &self.state {
            EscalationState::Idle => {}
            EscalationState::PendingConfirm {
                location,
                reason,
                countdown,
            } => {
                view.countdown = Some(*countdown);
                view.location = Some(*location);
                view.reason = Some(reason.clone());
            }
            EscalationState::Sending {
                location, reason, ..
            } => {
                view.location = Some(*location);
                view.reason = Some(reason.clone());
            }
            EscalationState::CooldownActive { remaining } => {
                view.cooldown_remaining = Some(*remaining);
            }
        }
        view
    }

    /// Shared entry action of manual and automatic confirmation.
    fn begin_send(&mut self) -> Option<SendOrder> {
        let EscalationState::PendingConfirm {
            location, reason, ..
        } = &self.state
        else {
            return None;
        };
        let order = SendOrder {
            attempt: self.next_attempt + 1,
            location: *location,
            reason: reason.clone(),
        };
        self.next_attempt = order.attempt;
        self.state = EscalationState::Sending {
            attempt: order.attempt,
            location: order.location,
            reason: order.reason.clone(),
        };
        Some(order)
    }
}
