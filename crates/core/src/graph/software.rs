use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use super::{
    AnalyserOptions, AudioGraphBackend, ContextState, FilterKind, FilterSpec, NodeId, SourceId,
};
use crate::{analysis::SpectrumAnalyser, Result, VisualiserError};

/// Running totals of everything that reached the playback destination.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DestinationStats {
    pub samples: u64,
    pub energy: f64,
}

impl DestinationStats {
    fn record(&mut self, block: &[f32]) {
        self.samples += block.len() as u64;
        self.energy += block.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
    }
}

/// In-memory audio graph. Blocks pushed into a source travel along the
/// directed edges: filters transform them, analysers record them, the
/// destination accumulates them.
///
/// Like a browser audio context it starts suspended and drops every block
/// until [`AudioGraphBackend::resume`] succeeds.
#[derive(Debug)]
pub struct SoftwareAudioGraph {
    sample_rate: u32,
    destination: NodeId,
    state: Mutex<GraphState>,
}

#[derive(Debug)]
struct GraphState {
    next_id: u32,
    nodes: HashMap<NodeId, Node>,
    bindings: HashMap<SourceId, Binding>,
    context: ContextState,
    fail_connections: bool,
    fail_resume: bool,
    destination: DestinationStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Owned(NodeId),
    External,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    outputs: Vec<NodeId>,
}

#[derive(Debug)]
enum NodeKind {
    Source,
    Filter(Biquad),
    Analyser(Box<SpectrumAnalyser>),
    Destination,
}

impl SoftwareAudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            destination,
            Node {
                kind: NodeKind::Destination,
                outputs: Vec::new(),
            },
        );

        Self {
            sample_rate,
            destination,
            state: Mutex::new(GraphState {
                next_id: 1,
                nodes,
                bindings: HashMap::new(),
                context: ContextState::Suspended,
                fail_connections: false,
                fail_resume: false,
                destination: DestinationStats::default(),
            }),
        }
    }

    /// Feeds one block of playback for `source`. Dropped while the context is
    /// not running or when the source has no node in this graph.
    pub fn push_samples(&self, source: &SourceId, block: &[f32]) {
        let mut state = self.lock();
        if state.context != ContextState::Running {
            return;
        }
        let Some(Binding::Owned(node)) = state.bindings.get(source).copied() else {
            return;
        };
        let GraphState {
            nodes, destination, ..
        } = &mut *state;
        propagate(nodes, destination, node, block);
    }

    /// Marks `source` as wired into some other graph, the way a media element
    /// already captured elsewhere behaves.
    pub fn bind_external(&self, source: &SourceId) {
        self.lock().bindings.insert(source.clone(), Binding::External);
    }

    pub fn suspend(&self) {
        let mut state = self.lock();
        if state.context == ContextState::Running {
            state.context = ContextState::Suspended;
        }
    }

    pub fn close(&self) {
        self.lock().context = ContextState::Closed;
    }

    /// Makes every subsequent `connect` fail.
    pub fn fail_connections(&self, fail: bool) {
        self.lock().fail_connections = fail;
    }

    /// Makes every subsequent `resume` fail.
    pub fn fail_resume(&self, fail: bool) {
        self.lock().fail_resume = fail;
    }

    pub fn destination_stats(&self) -> DestinationStats {
        self.lock().destination
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn outputs_of(&self, node: NodeId) -> Vec<NodeId> {
        self.lock()
            .nodes
            .get(&node)
            .map(|n| n.outputs.clone())
            .unwrap_or_default()
    }

    fn insert_node(&self, kind: NodeKind) -> NodeId {
        let mut state = self.lock();
        let id = NodeId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id,
            Node {
                kind,
                outputs: Vec::new(),
            },
        );
        id
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn propagate(
    nodes: &mut HashMap<NodeId, Node>,
    destination: &mut DestinationStats,
    from: NodeId,
    block: &[f32],
) {
    let outputs = match nodes.get(&from) {
        Some(node) => node.outputs.clone(),
        None => return,
    };

    for target in outputs {
        let Some(node) = nodes.get_mut(&target) else {
            continue;
        };
        match &mut node.kind {
            NodeKind::Filter(filter) => {
                let filtered: Vec<f32> = block.iter().map(|&s| filter.process(s)).collect();
                propagate(nodes, destination, target, &filtered);
            }
            NodeKind::Analyser(analyser) => analyser.push(block),
            NodeKind::Destination => destination.record(block),
            NodeKind::Source => {}
        }
    }
}

impl AudioGraphBackend for SoftwareAudioGraph {
    fn create_source_node(&self, source: &SourceId) -> Result<NodeId> {
        if self.lock().bindings.contains_key(source) {
            return Err(VisualiserError::GraphUnavailable {
                source_id: source.clone(),
            });
        }
        let id = self.insert_node(NodeKind::Source);
        self.lock().bindings.insert(source.clone(), Binding::Owned(id));
        debug!(source = %source, node = id.0, "created source node");
        Ok(id)
    }

    fn create_filter(&self, spec: &FilterSpec) -> Result<NodeId> {
        if spec.frequency <= 0.0 || spec.q <= 0.0 {
            return Err(VisualiserError::InvalidInput(
                "filter frequency and q must be positive",
            ));
        }
        let filter = Biquad::new(spec, self.sample_rate as f32);
        Ok(self.insert_node(NodeKind::Filter(filter)))
    }

    fn create_analyser(&self, options: &AnalyserOptions) -> Result<NodeId> {
        let analyser = SpectrumAnalyser::new(options.clone())?;
        Ok(self.insert_node(NodeKind::Analyser(Box::new(analyser))))
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let mut state = self.lock();
        if state.fail_connections {
            return Err(VisualiserError::ConnectionFailed(format!(
                "refused to connect {from:?} -> {to:?}"
            )));
        }
        if !state.nodes.contains_key(&to) {
            return Err(VisualiserError::UnknownNode(to));
        }
        let node = state
            .nodes
            .get_mut(&from)
            .ok_or(VisualiserError::UnknownNode(from))?;
        if !node.outputs.contains(&to) {
            node.outputs.push(to);
        }
        Ok(())
    }

    fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.lock()
            .nodes
            .get(&from)
            .map(|node| node.outputs.contains(&to))
            .unwrap_or(false)
    }

    fn disconnect(&self, node: NodeId) {
        if let Some(node) = self.lock().nodes.get_mut(&node) {
            node.outputs.clear();
        }
    }

    fn disconnect_edge(&self, from: NodeId, to: NodeId) {
        if let Some(node) = self.lock().nodes.get_mut(&from) {
            node.outputs.retain(|&id| id != to);
        }
    }

    fn release_node(&self, node: NodeId) {
        if node == self.destination {
            return;
        }
        let mut state = self.lock();
        if state.nodes.remove(&node).is_none() {
            return;
        }
        for other in state.nodes.values_mut() {
            other.outputs.retain(|&id| id != node);
        }
        state
            .bindings
            .retain(|_, binding| *binding != Binding::Owned(node));
    }

    fn frequency_bytes(&self, analyser: NodeId, out: &mut [u8]) -> Result<()> {
        let mut state = self.lock();
        match state.nodes.get_mut(&analyser).map(|node| &mut node.kind) {
            Some(NodeKind::Analyser(analyser)) => analyser.frequency_bytes(out),
            Some(_) => Err(VisualiserError::InvalidInput("node is not an analyser")),
            None => Err(VisualiserError::UnknownNode(analyser)),
        }
    }

    fn time_domain_bytes(&self, analyser: NodeId, out: &mut [u8]) -> Result<()> {
        let state = self.lock();
        match state.nodes.get(&analyser).map(|node| &node.kind) {
            Some(NodeKind::Analyser(analyser)) => {
                analyser.time_domain_bytes(out);
                Ok(())
            }
            Some(_) => Err(VisualiserError::InvalidInput("node is not an analyser")),
            None => Err(VisualiserError::UnknownNode(analyser)),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn context_state(&self) -> ContextState {
        self.lock().context
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.lock();
        match state.context {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(VisualiserError::ResumeFailed(
                "context is closed".to_string(),
            )),
            ContextState::Suspended if state.fail_resume => Err(VisualiserError::ResumeFailed(
                "resume rejected by the platform".to_string(),
            )),
            ContextState::Suspended => {
                state.context = ContextState::Running;
                Ok(())
            }
        }
    }
}

/// Direct form I biquad using the audio EQ cookbook coefficients.
#[derive(Debug, Clone)]
struct Biquad {
    b: [f32; 3],
    a: [f32; 2],
    x: [f32; 2],
    y: [f32; 2],
}

impl Biquad {
    fn new(spec: &FilterSpec, sample_rate: f32) -> Self {
        let a = 10f32.powf(spec.gain_db / 40.0);
        let w0 = 2.0 * PI * spec.frequency.min(sample_rate * 0.49) / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * spec.q);
        let shelf = 2.0 * a.sqrt() * alpha;

        let (b0, b1, b2, a0, a1, a2) = match spec.kind {
            FilterKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos,
                1.0 - alpha / a,
            ),
            FilterKind::LowShelf => (
                a * ((a + 1.0) - (a - 1.0) * cos + shelf),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                a * ((a + 1.0) - (a - 1.0) * cos - shelf),
                (a + 1.0) + (a - 1.0) * cos + shelf,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                (a + 1.0) + (a - 1.0) * cos - shelf,
            ),
            FilterKind::HighShelf => (
                a * ((a + 1.0) + (a - 1.0) * cos + shelf),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                a * ((a + 1.0) + (a - 1.0) * cos - shelf),
                (a + 1.0) - (a - 1.0) * cos + shelf,
                2.0 * ((a - 1.0) - (a + 1.0) * cos),
                (a + 1.0) - (a - 1.0) * cos - shelf,
            ),
        };

        Self {
            b: [b0 / a0, b1 / a0, b2 / a0],
            a: [a1 / a0, a2 / a0],
            x: [0.0; 2],
            y: [0.0; 2],
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.b[0] * input + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[0] * self.y[0]
            - self.a[1] * self.y[1];
        self.x = [input, self.x[0]];
        self.y = [output, self.y[0]];
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_graph() -> SoftwareAudioGraph {
        let graph = SoftwareAudioGraph::new(48_000);
        graph.resume().unwrap();
        graph
    }

    #[test]
    fn starts_suspended_and_drops_audio() {
        let graph = SoftwareAudioGraph::new(48_000);
        let source = SourceId::new("track");
        let node = graph.create_source_node(&source).unwrap();
        graph.connect(node, graph.destination()).unwrap();

        graph.push_samples(&source, &[0.5; 64]);
        assert_eq!(graph.context_state(), ContextState::Suspended);
        assert_eq!(graph.destination_stats().samples, 0);

        graph.resume().unwrap();
        graph.push_samples(&source, &[0.5; 64]);
        assert_eq!(graph.destination_stats().samples, 64);
    }

    #[test]
    fn source_nodes_are_created_once() {
        let graph = running_graph();
        let source = SourceId::new("track");
        graph.create_source_node(&source).unwrap();
        let err = graph.create_source_node(&source).unwrap_err();
        assert!(matches!(err, VisualiserError::GraphUnavailable { .. }));

        let foreign = SourceId::new("foreign");
        graph.bind_external(&foreign);
        assert!(graph.create_source_node(&foreign).is_err());
    }

    #[test]
    fn connecting_twice_is_a_no_op() {
        let graph = running_graph();
        let node = graph.create_source_node(&SourceId::new("a")).unwrap();
        graph.connect(node, graph.destination()).unwrap();
        graph.connect(node, graph.destination()).unwrap();
        assert_eq!(graph.outputs_of(node), vec![graph.destination()]);
    }

    #[test]
    fn analysers_observe_without_feeding_the_destination() {
        let graph = running_graph();
        let source = SourceId::new("track");
        let node = graph.create_source_node(&source).unwrap();
        graph.connect(node, graph.destination()).unwrap();
        let analyser = graph.create_analyser(&AnalyserOptions::default()).unwrap();
        graph.connect(node, analyser).unwrap();

        let block: Vec<f32> = (0..128).map(|i| (i as f32 * 0.3).sin()).collect();
        graph.push_samples(&source, &block);

        let stats = graph.destination_stats();
        assert_eq!(stats.samples, 128);

        let mut bytes = vec![0u8; 64];
        graph.frequency_bytes(analyser, &mut bytes).unwrap();
        assert!(bytes.iter().any(|&b| b > 0));
    }

    #[test]
    fn peaking_filter_boosts_its_centre_frequency() {
        let graph = running_graph();
        let source = SourceId::new("track");
        let node = graph.create_source_node(&source).unwrap();
        let filter = graph.create_filter(&FilterSpec::peaking(1_000.0, 12.0)).unwrap();
        graph.connect(node, filter).unwrap();
        graph.connect(filter, graph.destination()).unwrap();

        let block: Vec<f32> = (0..4_800)
            .map(|i| 0.1 * (2.0 * PI * 1_000.0 * i as f32 / 48_000.0).sin())
            .collect();
        let dry: f64 = block.iter().map(|&s| (s as f64).powi(2)).sum();
        graph.push_samples(&source, &block);

        assert!(graph.destination_stats().energy > dry * 4.0);
    }

    #[test]
    fn releasing_a_source_frees_its_binding() {
        let graph = running_graph();
        let source = SourceId::new("track");
        let node = graph.create_source_node(&source).unwrap();
        graph.connect(node, graph.destination()).unwrap();
        graph.release_node(node);

        assert_eq!(graph.node_count(), 1);
        assert!(graph.create_source_node(&source).is_ok());
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let graph = SoftwareAudioGraph::new(44_100);
        graph.fail_resume(true);
        assert!(matches!(
            graph.resume(),
            Err(VisualiserError::ResumeFailed(_))
        ));

        graph.fail_connections(true);
        let node = graph.create_source_node(&SourceId::new("x")).unwrap();
        assert!(matches!(
            graph.connect(node, graph.destination()),
            Err(VisualiserError::ConnectionFailed(_))
        ));
    }
}
