//! Interaction state machine
//!
//! Owns the single pending-request slot of the host panel. The panel is
//! `idle` while the slot is empty and `waiting` while it holds a request.
//! A request leaves the slot through exactly one of: submit, end, deadline,
//! withdrawal or clear. Whichever comes first wins; the rest are no-ops.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::config::{Config, ConcurrencyPolicy};
use crate::payload::FeedbackResult;
use crate::protocol::{PanelAction, PanelEvent, PanelState};

const EVENT_CAPACITY: usize = 32;

/// The one in-flight prompt and the resolver waiting for its answer.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: Uuid,
    pub prompt: String,
    resolver: oneshot::Sender<FeedbackResult>,
}

impl PendingRequest {
    fn resolve(self, result: FeedbackResult) {
        // The waiting side may already be gone (connection dropped).
        let _ = self.resolver.send(result);
    }
}

/// Handle on a prompt handed to [`Interaction::show_prompt`].
#[derive(Debug)]
pub struct Ticket {
    pub id: Uuid,
    rx: oneshot::Receiver<FeedbackResult>,
}

#[derive(Debug)]
pub struct Interaction {
    pending: Mutex<Option<PendingRequest>>,
    events: broadcast::Sender<PanelEvent>,
    deadline: Duration,
    policy: ConcurrencyPolicy,
}

impl Interaction {
    pub fn new(deadline: Duration, policy: ConcurrencyPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pending: Mutex::new(None),
            events,
            deadline,
            policy,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.feedback_timeout(), config.panel.concurrency)
    }

    /// Panel event stream. Events are sent while the slot lock is held, so
    /// every subscriber sees `showPrompt` before the matching `idle`.
    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PanelState {
        if self.pending.lock().is_some() {
            PanelState::Waiting
        } else {
            PanelState::Idle
        }
    }

    pub fn current_prompt(&self) -> Option<String> {
        self.current_request().map(|(_, prompt)| prompt)
    }

    /// Id and prompt of the waiting request, for a panel catching up.
    pub fn current_request(&self) -> Option<(Uuid, String)> {
        self.pending
            .lock()
            .as_ref()
            .map(|p| (p.id, p.prompt.clone()))
    }

    /// `idle -> waiting`. Applies the concurrency policy if a prompt is
    /// already waiting.
    pub fn show_prompt(&self, prompt: impl Into<String>) -> Ticket {
        let prompt = prompt.into();
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        let mut slot = self.pending.lock();
        if let Some(existing) = slot.take() {
            match self.policy {
                ConcurrencyPolicy::Supersede => {
                    tracing::warn!(
                        "Request {} superseded by {}; approving the displaced caller",
                        existing.id,
                        id
                    );
                    existing.resolve(FeedbackResult::approved());
                }
                ConcurrencyPolicy::Reject => {
                    tracing::warn!(
                        "Request {} rejected while {} is waiting; approving it",
                        id,
                        existing.id
                    );
                    *slot = Some(existing);
                    let _ = tx.send(FeedbackResult::approved());
                    return Ticket { id, rx };
                }
            }
        }

        *slot = Some(PendingRequest {
            id,
            prompt: prompt.clone(),
            resolver: tx,
        });
        self.emit(PanelEvent::ShowPrompt { id, prompt });
        self.emit(PanelEvent::UpdateState {
            state: PanelState::Waiting,
        });
        drop(slot);

        tracing::info!("Waiting for feedback on request {}", id);
        Ticket { id, rx }
    }

    /// Suspends until the ticket's request is resolved or the deadline
    /// elapses. Never fails: every exit is a valid result.
    pub async fn await_resolution(&self, ticket: Ticket) -> FeedbackResult {
        let Ticket { id, mut rx } = ticket;
        match tokio::time::timeout(self.deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::debug!("Request {} dropped without an answer", id);
                FeedbackResult::approved()
            }
            Err(_) => {
                if self.resolve_if(id, FeedbackResult::approved()) {
                    tracing::info!("Request {} timed out after {:?}; approving", id, self.deadline);
                }
                // A human answer can land between the timer firing and the lock.
                rx.try_recv().unwrap_or_else(|_| FeedbackResult::approved())
            }
        }
    }

    /// `waiting -> idle` with the human's answer. Returns `false` if nothing
    /// was waiting.
    pub fn submit(&self, text: impl Into<String>, images: Vec<String>) -> bool {
        self.resolve(FeedbackResult::new(text, images))
    }

    /// `waiting -> idle` with the end-of-conversation sentinel.
    pub fn end(&self) -> bool {
        self.resolve(FeedbackResult::terminated())
    }

    /// Like [`Interaction::submit`], but only if `id` is still the request
    /// waiting. A draft written for a superseded prompt never answers the
    /// one that replaced it.
    pub fn submit_for(&self, id: Uuid, text: impl Into<String>, images: Vec<String>) -> bool {
        self.resolve_if(id, FeedbackResult::new(text, images))
    }

    pub fn end_for(&self, id: Uuid) -> bool {
        self.resolve_if(id, FeedbackResult::terminated())
    }

    pub fn handle_action(&self, action: PanelAction) -> bool {
        let id = action.request_id();
        let handled = match action {
            PanelAction::Submit { id, text, images } => self.submit_for(id, text, images),
            PanelAction::End { id } => self.end_for(id),
        };
        if !handled {
            tracing::debug!("Panel action for request {} is stale; ignoring", id);
        }
        handled
    }

    /// Resolve `id` as approved if it is still the one waiting. Used when
    /// the requesting connection went away.
    pub fn withdraw(&self, id: Uuid) -> bool {
        let withdrawn = self.resolve_if(id, FeedbackResult::approved());
        if withdrawn {
            tracing::info!("Request {} withdrawn", id);
        }
        withdrawn
    }

    /// Drop whatever is waiting. Its awaiting side resolves fail-open.
    pub fn clear(&self) {
        let mut slot = self.pending.lock();
        if let Some(pending) = slot.take() {
            tracing::info!("Dropping pending request {}", pending.id);
            drop(pending);
            self.emit(PanelEvent::UpdateState {
                state: PanelState::Idle,
            });
        }
    }

    fn resolve(&self, result: FeedbackResult) -> bool {
        let mut slot = self.pending.lock();
        match slot.take() {
            Some(pending) => {
                tracing::info!("Request {} resolved as {:?}", pending.id, result.kind());
                pending.resolve(result);
                self.emit(PanelEvent::UpdateState {
                    state: PanelState::Idle,
                });
                true
            }
            None => {
                tracing::debug!("No pending request; ignoring resolution");
                false
            }
        }
    }

    fn resolve_if(&self, id: Uuid, result: FeedbackResult) -> bool {
        let mut slot = self.pending.lock();
        if slot.as_ref().map(|p| p.id) != Some(id) {
            return false;
        }
        if let Some(pending) = slot.take() {
            tracing::info!("Request {} resolved as {:?}", pending.id, result.kind());
            pending.resolve(result);
            self.emit(PanelEvent::UpdateState {
                state: PanelState::Idle,
            });
        }
        true
    }

    fn emit(&self, event: PanelEvent) {
        // No subscribers is fine: a headless host still answers via timeout.
        let _ = self.events.send(event);
    }
}

impl Default for Interaction {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
