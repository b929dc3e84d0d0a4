use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kinds of user interaction the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GestureKind {
    Click,
    KeyDown,
    TouchEnd,
    PointerMove,
    Scroll,
}

impl GestureKind {
    /// Whether the platform lets this interaction unlock audio processing.
    pub fn unlocks_audio(self) -> bool {
        matches!(self, Self::Click | Self::KeyDown | Self::TouchEnd)
    }
}

type Deferred = Box<dyn FnOnce() + Send>;

/// One-shot latch recording the first qualifying user gesture.
///
/// Audio contexts start suspended until the user interacts with the page, so
/// work that needs a running context is queued here and released by the
/// first gesture that unlocks audio.
#[derive(Clone, Default)]
pub struct GestureGate {
    inner: Arc<Mutex<GateState>>,
}

#[derive(Default)]
struct GateState {
    open: bool,
    deferred: Vec<Deferred>,
}

impl GestureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that behaves as if the gesture already happened.
    pub fn unlocked() -> Self {
        let gate = Self::new();
        gate.lock().open = true;
        gate
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Reports an interaction. Returns `true` when it opened the gate.
    pub fn observe(&self, kind: GestureKind) -> bool {
        if !kind.unlocks_audio() {
            return false;
        }

        let deferred = {
            let mut state = self.lock();
            if state.open {
                return false;
            }
            state.open = true;
            std::mem::take(&mut state.deferred)
        };

        debug!(?kind, deferred = deferred.len(), "user gesture unlocked audio");
        for task in deferred {
            task();
        }
        true
    }

    /// Runs `task` now if the gate is open, otherwise once it opens.
    pub fn when_open(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        if state.open {
            drop(state);
            task();
        } else {
            state.deferred.push(Box::new(task));
        }
    }

    pub fn deferred_count(&self) -> usize {
        self.lock().deferred.len()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for GestureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("GestureGate")
            .field("open", &state.open)
            .field("deferred", &state.deferred.len())
            .finish()
    }
}
