use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Callback run on the next display frame with the frame timestamp in
/// milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) + Send>;

/// Identifier of a pending frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameRequestId(pub u64);

/// Host hook that runs callbacks once per display frame.
pub trait FrameScheduler: Send + Sync {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId;

    /// Cancels a pending request. Unknown or already-run ids are ignored.
    fn cancel_frame(&self, id: FrameRequestId);
}

/// Deterministic scheduler driven explicitly by [`ManualFrameScheduler::run_frame`].
///
/// Callbacks requested while a frame runs are deferred to the next frame,
/// matching display-frame semantics.
#[derive(Default)]
pub struct ManualFrameScheduler {
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    now_ms: f64,
    frames_run: u64,
    pending: BTreeMap<FrameRequestId, FrameCallback>,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock by `delta` and runs every callback requested before
    /// this call. Returns how many callbacks ran.
    pub fn run_frame(&self, delta: Duration) -> usize {
        let (now, due) = {
            let mut state = self.lock();
            state.now_ms += delta.as_secs_f64() * 1_000.0;
            state.frames_run += 1;
            (state.now_ms, std::mem::take(&mut state.pending))
        };

        let count = due.len();
        for (_, callback) in due {
            callback(now);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn frames_run(&self) -> u64 {
        self.lock().frames_run
    }

    pub fn now_ms(&self) -> f64 {
        self.lock().now_ms
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let mut state = self.lock();
        let id = FrameRequestId(state.next_id);
        state.next_id += 1;
        state.pending.insert(id, callback);
        id
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.lock().pending.remove(&id);
    }
}

impl std::fmt::Debug for ManualFrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualFrameScheduler")
            .field("now_ms", &state.now_ms)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// Accumulates elapsed playback time from per-frame deltas.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    pub time_seconds: f32,
    pub frames: u64,
}

impl FrameClock {
    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
        self.frames = 0;
    }

    pub fn advance(&mut self, delta: f32) {
        self.time_seconds = (self.time_seconds + delta).max(0.0);
        self.frames += 1;
    }

    /// Frame period for a target rate; a zero rate is treated as 1 fps.
    pub fn frame_period(fps: u32) -> Duration {
        Duration::from_secs_f64(1.0 / fps.max(1) as f64)
    }
}
