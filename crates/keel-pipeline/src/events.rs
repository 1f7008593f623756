//! Runner event stream for observability.
//!
//! Emits [`RunnerEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers can follow a run without coupling to the runner internals.

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Events emitted while a plan executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunnerEvent {
    RunStarted {
        hook_count: usize,
    },
    PhaseStarted {
        phase: Phase,
    },
    PhaseCompleted {
        phase: Phase,
        failures: usize,
    },
    /// A non-finalize phase skipped because an earlier fail-fast phase failed.
    PhaseSkipped {
        phase: Phase,
    },
    HookStarted {
        phase: Phase,
        hook_id: String,
    },
    HookCompleted {
        phase: Phase,
        hook_id: String,
        duration_ms: u64,
    },
    HookFailed {
        phase: Phase,
        hook_id: String,
        error_type: String,
        error: String,
    },
    HookTimedOut {
        phase: Phase,
        hook_id: String,
        timeout_ms: u64,
    },
    RunCompleted {
        success: bool,
        error_count: usize,
        duration_ms: u64,
    },
    RunAborted {
        phase: Phase,
        hook_id: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunnerEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit to all current subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: RunnerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunnerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
