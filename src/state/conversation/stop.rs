use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user pressed stop.
    User,
    /// An edit, redo or revamp replaced the running response.
    Superseded,
}

impl StopReason {
    pub fn marker(self) -> &'static str {
        match self {
            StopReason::User => " [forced stop, by user]",
            StopReason::Superseded => " [aborted]",
        }
    }
}

struct TurnControl {
    token: CancellationToken,
    reason: Option<StopReason>,
}

struct StopState {
    control: Mutex<TurnControl>,
    streaming: AtomicBool,
}

/// Cloneable remote for the running turn. Each turn installs a fresh token,
/// so a stop never carries over into the next one.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<StopState>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self {
            state: Arc::new(StopState {
                control: Mutex::new(TurnControl {
                    token: CancellationToken::new(),
                    reason: None,
                }),
                streaming: AtomicBool::new(false),
            }),
        }
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self, reason: StopReason) {
        let mut control = self.control();
        if control.reason.is_none() {
            control.reason = Some(reason);
        }
        control.token.cancel();
        tracing::debug!(?reason, "stop requested");
    }

    pub fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::SeqCst)
    }

    /// Claims the streaming flag and resets cancellation for a new turn.
    pub(super) fn begin_turn(&self) -> Result<TurnGuard, ValidationError> {
        if self
            .state
            .streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ValidationError::TurnInProgress);
        }

        let token = CancellationToken::new();
        let mut control = self.control();
        control.token = token.clone();
        control.reason = None;
        drop(control);

        Ok(TurnGuard {
            handle: self.clone(),
            token,
        })
    }

    fn control(&self) -> std::sync::MutexGuard<'_, TurnControl> {
        self.state
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the length of one turn; releases the streaming flag on drop.
pub(super) struct TurnGuard {
    handle: StopHandle,
    token: CancellationToken,
}

impl TurnGuard {
    pub(super) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(super) fn reason(&self) -> StopReason {
        self.handle.control().reason.unwrap_or(StopReason::User)
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.handle.state.streaming.store(false, Ordering::SeqCst);
    }
}
