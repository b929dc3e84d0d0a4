//! Read-only analysis taps on the shared playback graph.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    graph::{
        AnalyserOptions, AudioGraphBackend, ContextState, GraphConnectionRegistry, NodeId, SourceId,
    },
    timeline::{FrameRequestId, FrameScheduler},
    Result,
};

mod gesture;

pub use gesture::{GestureGate, GestureKind};

/// Callback invoked once per display frame with the current byte spectrum.
pub type FrameDataCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Lifecycle of an [`AnalysisFrameSource`]. `TornDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSourceState {
    Uninitialized,
    AwaitingGesture,
    Initializing,
    Initialized,
    Looping,
    TornDown,
}

/// What a call to [`AnalysisFrameSource::initialize`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The tap is wired and sampling.
    Ready,
    /// Initialisation is queued until the first qualifying user gesture.
    AwaitingGesture,
    /// Already initialised (or initialising); nothing changed.
    AlreadyActive,
    /// Visualisation is disabled for this source: no source, graph
    /// unavailable, hookup failure, or the source was torn down.
    Skipped,
}

/// Owns one analyser tap grafted onto the shared graph of a playable source
/// and pumps its spectrum to a per-frame callback.
///
/// Every audio-graph failure is logged and degrades to an inactive tap; none
/// of the public methods return errors or panic.
pub struct AnalysisFrameSource {
    core: Arc<Mutex<SourceCore>>,
}

struct SourceCore {
    state: FrameSourceState,
    source: Option<SourceId>,
    options: AnalyserOptions,
    registry: Weak<GraphConnectionRegistry>,
    gate: GestureGate,
    scheduler: Arc<dyn FrameScheduler>,
    tap: Option<AnalyserTap>,
    frame_loop: Option<Arc<LoopToken>>,
}

struct AnalyserTap {
    node: NodeId,
    source: SourceId,
    backend: Arc<dyn AudioGraphBackend>,
    frequency: Vec<u8>,
    time_domain: Vec<u8>,
}

impl AnalyserTap {
    fn read_frequency(&mut self) -> &[u8] {
        if let Err(err) = self.backend.frequency_bytes(self.node, &mut self.frequency) {
            warn!(source = %self.source, error = %err, "failed to read frequency data");
            self.frequency.fill(0);
        }
        &self.frequency
    }

    fn read_time_domain(&mut self) -> &[u8] {
        if let Err(err) = self.backend.time_domain_bytes(self.node, &mut self.time_domain) {
            warn!(source = %self.source, error = %err, "failed to read time-domain data");
            self.time_domain.fill(128);
        }
        &self.time_domain
    }
}

impl AnalysisFrameSource {
    /// Creates an uninitialised source. `source` may be absent, in which case
    /// the instance stays inert.
    pub fn new(
        registry: &Arc<GraphConnectionRegistry>,
        gate: GestureGate,
        scheduler: Arc<dyn FrameScheduler>,
        source: Option<SourceId>,
        options: AnalyserOptions,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(SourceCore {
                state: FrameSourceState::Uninitialized,
                source,
                options,
                registry: Arc::downgrade(registry),
                gate,
                scheduler,
                tap: None,
                frame_loop: None,
            })),
        }
    }

    pub fn state(&self) -> FrameSourceState {
        self.lock().state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state(),
            FrameSourceState::Initialized | FrameSourceState::Looping
        )
    }

    /// Wires the tap into the graph. Before the first user gesture the work is
    /// queued on the gate and runs when the gesture arrives.
    pub fn initialize(&self) -> InitOutcome {
        let gate = {
            let mut core = self.lock();
            match core.state {
                FrameSourceState::Uninitialized => {}
                FrameSourceState::AwaitingGesture => return InitOutcome::AwaitingGesture,
                FrameSourceState::TornDown => return InitOutcome::Skipped,
                _ => return InitOutcome::AlreadyActive,
            }
            if core.source.is_none() {
                debug!("no playable source, analysis stays inactive");
                return InitOutcome::Skipped;
            }
            if core.gate.is_open() {
                return wire_tap(&mut core);
            }
            core.state = FrameSourceState::AwaitingGesture;
            core.gate.clone()
        };

        debug!("waiting for a user gesture before touching the audio graph");
        let weak = Arc::downgrade(&self.core);
        gate.when_open(move || {
            if let Some(core) = weak.upgrade() {
                let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
                if core.state == FrameSourceState::AwaitingGesture {
                    wire_tap(&mut core);
                }
            }
        });

        match self.state() {
            FrameSourceState::Initialized | FrameSourceState::Looping => InitOutcome::Ready,
            FrameSourceState::AwaitingGesture => InitOutcome::AwaitingGesture,
            _ => InitOutcome::Skipped,
        }
    }

    /// Current byte spectrum, `frequency_bin_count` long; empty before
    /// initialisation.
    pub fn frequency_data(&self) -> Vec<u8> {
        self.lock()
            .tap
            .as_mut()
            .map(|tap| tap.read_frequency().to_vec())
            .unwrap_or_default()
    }

    /// Current waveform bytes; empty before initialisation.
    pub fn time_domain_data(&self) -> Vec<u8> {
        self.lock()
            .tap
            .as_mut()
            .map(|tap| tap.read_time_domain().to_vec())
            .unwrap_or_default()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.lock().tap.as_ref().map(|tap| tap.backend.sample_rate())
    }

    pub fn fft_size(&self) -> usize {
        self.lock().options.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.lock()
            .tap
            .as_ref()
            .map(|tap| tap.frequency.len())
            .unwrap_or(0)
    }

    /// Starts pumping `callback` once per display frame. Replaces a running
    /// loop; does nothing without a tap.
    pub fn start_loop(&self, callback: impl FnMut(&[u8]) + Send + 'static) {
        let task = {
            let mut core = self.lock();
            if core.tap.is_none() {
                debug!("no analysis tap, frame loop not started");
                return;
            }
            if let Some(token) = core.frame_loop.take() {
                token.cancel(core.scheduler.as_ref());
            }

            let token = Arc::new(LoopToken::default());
            core.frame_loop = Some(token.clone());
            core.state = FrameSourceState::Looping;
            Arc::new(LoopTask {
                token,
                core: Arc::downgrade(&self.core),
                scheduler: core.scheduler.clone(),
                callback: Mutex::new(Box::new(callback)),
            })
        };

        task.schedule();
    }

    /// Cancels the frame loop. Once this returns the callback never runs
    /// again, even if a frame was already requested.
    ///
    /// The guarantee holds for calls made on the thread that drives the
    /// scheduler, including from inside the callback. A call from another
    /// thread can race a tick that already passed its cancellation check, so
    /// at most one more callback may still be in flight.
    pub fn stop_loop(&self) {
        let mut core = self.lock();
        if let Some(token) = core.frame_loop.take() {
            token.cancel(core.scheduler.as_ref());
        }
        if core.state == FrameSourceState::Looping {
            core.state = FrameSourceState::Initialized;
        }
    }

    /// Best-effort resume of a suspended processing context.
    pub fn resume_if_suspended(&self) {
        let registry = self.lock().registry.upgrade();
        if let Some(registry) = registry {
            resume_backend(registry.backend().as_ref());
        }
    }

    /// Stops the loop, unhooks the tap and releases the connection. Safe to
    /// call repeatedly and while initialisation is still waiting for a
    /// gesture.
    pub fn teardown(&self) {
        let mut core = self.lock();
        if core.state == FrameSourceState::TornDown {
            return;
        }
        if let Some(token) = core.frame_loop.take() {
            token.cancel(core.scheduler.as_ref());
        }
        if let Some(tap) = core.tap.take() {
            if let Some(registry) = core.registry.upgrade() {
                registry.detach_tap(&tap.source, tap.node);
                registry.release(&tap.source);
            }
            debug!(source = %tap.source, "analysis tap torn down");
        }
        core.source = None;
        core.registry = Weak::new();
        core.state = FrameSourceState::TornDown;
    }

    fn lock(&self) -> MutexGuard<'_, SourceCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AnalysisFrameSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for AnalysisFrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("AnalysisFrameSource")
            .field("state", &core.state)
            .field("source", &core.source)
            .field("options", &core.options)
            .finish()
    }
}

fn wire_tap(core: &mut SourceCore) -> InitOutcome {
    core.state = FrameSourceState::Initializing;

    let (Some(source), Some(registry)) = (core.source.clone(), core.registry.upgrade()) else {
        warn!("graph registry dropped before initialisation");
        core.state = FrameSourceState::Uninitialized;
        return InitOutcome::Skipped;
    };

    if registry.acquire(&source).is_none() {
        core.state = FrameSourceState::Uninitialized;
        return InitOutcome::Skipped;
    }

    match build_tap(&registry, &source, &core.options) {
        Ok(tap) => {
            resume_backend(tap.backend.as_ref());
            info!(%source, bins = tap.frequency.len(), "analysis tap ready");
            core.tap = Some(tap);
            core.state = FrameSourceState::Initialized;
            InitOutcome::Ready
        }
        Err(err) => {
            warn!(%source, error = %err, "analysis tap unavailable, visualisation disabled");
            registry.release(&source);
            core.state = FrameSourceState::Uninitialized;
            InitOutcome::Skipped
        }
    }
}

fn build_tap(
    registry: &GraphConnectionRegistry,
    source: &SourceId,
    options: &AnalyserOptions,
) -> Result<AnalyserTap> {
    options.validate()?;
    let backend = registry.backend().clone();
    let node = backend.create_analyser(options)?;

    let wired = registry
        .attach_tap(source, node)
        .and_then(|()| registry.ensure_chain_complete(source));
    if let Err(err) = wired {
        registry.detach_tap(source, node);
        return Err(err);
    }

    let bins = options.frequency_bin_count();
    Ok(AnalyserTap {
        node,
        source: source.clone(),
        backend,
        frequency: vec![0; bins],
        time_domain: vec![128; bins],
    })
}

fn resume_backend(backend: &dyn AudioGraphBackend) {
    if backend.context_state() != ContextState::Suspended {
        return;
    }
    match backend.resume() {
        Ok(()) => debug!("audio context resumed"),
        Err(err) => warn!(error = %err, "audio context stayed suspended"),
    }
}

/// Cancellation state shared between a source and its running loop.
#[derive(Default)]
struct LoopToken {
    cancelled: AtomicBool,
    pending: Mutex<Option<FrameRequestId>>,
}

impl LoopToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self, scheduler: &dyn FrameScheduler) {
        self.cancelled.store(true, Ordering::SeqCst);
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = pending {
            scheduler.cancel_frame(id);
        }
    }
}

/// Self-rescheduling frame pump. Each tick checks the token before sampling,
/// before calling back, and before requesting the next frame.
struct LoopTask {
    token: Arc<LoopToken>,
    core: Weak<Mutex<SourceCore>>,
    scheduler: Arc<dyn FrameScheduler>,
    callback: Mutex<FrameDataCallback>,
}

impl LoopTask {
    fn schedule(self: &Arc<Self>) {
        let mut pending = self
            .token
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.token.is_cancelled() {
            return;
        }
        let task = Arc::clone(self);
        *pending = Some(self.scheduler.request_frame(Box::new(move |_| task.tick())));
    }

    fn tick(self: Arc<Self>) {
        self.token
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.token.is_cancelled() {
            return;
        }

        let Some(core) = self.core.upgrade() else {
            return;
        };
        let data = {
            let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
            match core.tap.as_mut() {
                Some(tap) => tap.read_frequency().to_vec(),
                None => return,
            }
        };
        drop(core);

        if self.token.is_cancelled() {
            return;
        }
        {
            let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(&data);
        }
        self.schedule();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use super::*;
    use crate::{graph::SoftwareAudioGraph, timeline::ManualFrameScheduler};

    const FRAME: Duration = Duration::from_millis(16);

    struct Harness {
        graph: Arc<SoftwareAudioGraph>,
        registry: Arc<GraphConnectionRegistry>,
        scheduler: Arc<ManualFrameScheduler>,
        gate: GestureGate,
        source: SourceId,
    }

    impl Harness {
        fn new() -> Self {
            let graph = Arc::new(SoftwareAudioGraph::new(48_000));
            Self {
                registry: Arc::new(GraphConnectionRegistry::new(graph.clone())),
                graph,
                scheduler: Arc::new(ManualFrameScheduler::new()),
                gate: GestureGate::new(),
                source: SourceId::new("track-1"),
            }
        }

        fn frame_source(&self) -> AnalysisFrameSource {
            AnalysisFrameSource::new(
                &self.registry,
                self.gate.clone(),
                self.scheduler.clone(),
                Some(self.source.clone()),
                AnalyserOptions::default(),
            )
        }

        fn play(&self) {
            let block: Vec<f32> = (0..512)
                .map(|i| 0.8 * (i as f32 * 0.05).sin() + 0.2 * (i as f32 * 0.9).sin())
                .collect();
            self.graph.push_samples(&self.source, &block);
        }
    }

    #[test]
    fn data_is_empty_before_initialisation() {
        let harness = Harness::new();
        let source = harness.frame_source();

        assert!(source.frequency_data().is_empty());
        assert!(source.time_domain_data().is_empty());
        assert_eq!(source.sample_rate(), None);
        assert_eq!(source.fft_size(), 128);
        assert!(!source.is_initialized());
    }

    #[test]
    fn initialisation_waits_for_a_gesture() {
        let harness = Harness::new();
        let source = harness.frame_source();

        assert_eq!(source.initialize(), InitOutcome::AwaitingGesture);
        assert_eq!(source.initialize(), InitOutcome::AwaitingGesture);
        assert!(harness.registry.is_empty());

        harness.gate.observe(GestureKind::Click);
        assert!(source.is_initialized());
        assert_eq!(source.initialize(), InitOutcome::AlreadyActive);
        assert_eq!(harness.graph.context_state(), ContextState::Running);

        harness.play();
        let data = source.frequency_data();
        assert_eq!(data.len(), 64);
        assert!(data.iter().any(|&b| b > 0));
        assert_eq!(source.time_domain_data().len(), 64);
        assert_eq!(source.sample_rate(), Some(48_000));
    }

    #[test]
    fn missing_source_is_skipped() {
        let harness = Harness::new();
        let source = AnalysisFrameSource::new(
            &harness.registry,
            GestureGate::unlocked(),
            harness.scheduler.clone(),
            None,
            AnalyserOptions::default(),
        );
        assert_eq!(source.initialize(), InitOutcome::Skipped);
        assert!(source.frequency_data().is_empty());
    }

    #[test]
    fn foreign_graph_disables_visualisation_silently() {
        let harness = Harness::new();
        harness.graph.bind_external(&harness.source);
        harness.gate.observe(GestureKind::KeyDown);

        let source = harness.frame_source();
        assert_eq!(source.initialize(), InitOutcome::Skipped);
        assert_eq!(source.state(), FrameSourceState::Uninitialized);
        assert!(source.frequency_data().is_empty());
    }

    #[test]
    fn connection_failures_roll_back() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let first = harness.frame_source();
        assert_eq!(first.initialize(), InitOutcome::Ready);

        harness.graph.fail_connections(true);
        let second = harness.frame_source();
        assert_eq!(second.initialize(), InitOutcome::Skipped);
        assert_eq!(harness.registry.ref_count(&harness.source), 1);
        assert!(first.is_initialized());
    }

    #[test]
    fn two_taps_share_one_connection() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let first = harness.frame_source();
        let second = harness.frame_source();

        assert_eq!(first.initialize(), InitOutcome::Ready);
        assert_eq!(second.initialize(), InitOutcome::Ready);
        assert_eq!(harness.registry.ref_count(&harness.source), 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        for (name, source) in [("first", &first), ("second", &second)] {
            let seen = seen.clone();
            source.start_loop(move |data| {
                seen.lock().unwrap().push((name, data.iter().any(|&b| b > 0)));
            });
        }

        harness.play();
        harness.scheduler.run_frame(FRAME);
        harness.play();
        harness.scheduler.run_frame(FRAME);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|(_, non_empty)| *non_empty));

        first.teardown();
        assert_eq!(harness.registry.ref_count(&harness.source), 1);
        second.teardown();
        assert!(harness.registry.is_empty());
    }

    #[test]
    fn stop_loop_cancels_a_pending_frame() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let source = harness.frame_source();
        source.initialize();

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = calls.clone();
            source.start_loop(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            harness.scheduler.run_frame(FRAME);
            source.stop_loop();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(harness.scheduler.pending_count(), 0);
        harness.scheduler.run_frame(FRAME);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(source.state(), FrameSourceState::Initialized);
    }

    #[test]
    fn callback_may_stop_its_own_loop() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let source = Arc::new(harness.frame_source());
        source.initialize();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let weak = Arc::downgrade(&source);
        source.start_loop(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                if let Some(source) = weak.upgrade() {
                    source.stop_loop();
                }
            }
        });

        for _ in 0..6 {
            harness.scheduler.run_frame(FRAME);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(harness.scheduler.pending_count(), 0);
    }

    #[test]
    fn loop_requires_a_tap() {
        let harness = Harness::new();
        let source = harness.frame_source();
        source.start_loop(|_| panic!("no tap, no frames"));
        assert_eq!(harness.scheduler.pending_count(), 0);
        harness.scheduler.run_frame(FRAME);
    }

    #[test]
    fn teardown_during_pending_initialisation_wins() {
        let harness = Harness::new();
        let source = harness.frame_source();
        assert_eq!(source.initialize(), InitOutcome::AwaitingGesture);

        source.teardown();
        source.teardown();
        harness.gate.observe(GestureKind::TouchEnd);

        assert_eq!(source.state(), FrameSourceState::TornDown);
        assert!(harness.registry.is_empty());
        assert_eq!(source.initialize(), InitOutcome::Skipped);
    }

    #[test]
    fn teardown_stops_the_loop_and_releases() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let source = harness.frame_source();
        source.initialize();
        source.start_loop(|_| {});
        assert_eq!(harness.scheduler.pending_count(), 1);

        source.teardown();
        assert_eq!(harness.scheduler.pending_count(), 0);
        assert!(harness.registry.is_empty());
        assert!(source.frequency_data().is_empty());
        assert_eq!(harness.graph.node_count(), 1);
    }

    #[test]
    fn dropping_a_source_releases_its_connection() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        {
            let source = harness.frame_source();
            source.initialize();
            assert!(harness.registry.contains(&harness.source));
        }
        assert!(harness.registry.is_empty());
    }

    #[test]
    fn failed_resume_is_logged_not_raised() {
        let harness = Harness::new();
        harness.graph.fail_resume(true);
        harness.gate.observe(GestureKind::Click);
        let source = harness.frame_source();

        assert_eq!(source.initialize(), InitOutcome::Ready);
        source.resume_if_suspended();
        assert_eq!(harness.graph.context_state(), ContextState::Suspended);

        harness.play();
        assert!(source.frequency_data().iter().all(|&b| b == 0));

        harness.graph.fail_resume(false);
        source.resume_if_suspended();
        assert_eq!(harness.graph.context_state(), ContextState::Running);
    }

    #[test]
    fn suspended_context_resumes_but_closed_one_stays_closed() {
        let harness = Harness::new();
        harness.gate.observe(GestureKind::Click);
        let source = harness.frame_source();
        assert_eq!(source.initialize(), InitOutcome::Ready);

        harness.graph.suspend();
        harness.play();
        assert!(source.frequency_data().iter().all(|&b| b == 0));
        source.resume_if_suspended();
        assert_eq!(harness.graph.context_state(), ContextState::Running);

        harness.graph.close();
        source.resume_if_suspended();
        assert_eq!(harness.graph.context_state(), ContextState::Closed);
        assert_eq!(source.frequency_data().len(), 64);

        let late = harness.frame_source();
        assert_eq!(late.initialize(), InitOutcome::Ready);
        assert_eq!(harness.graph.context_state(), ContextState::Closed);
    }
}
