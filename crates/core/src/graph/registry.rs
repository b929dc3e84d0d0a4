use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, warn};

use super::{AnalyserOptions, AudioGraphBackend, FilterSpec, NodeId, SourceId};
use crate::{Result, VisualiserError};

/// Snapshot of a connection handed to consumers by [`GraphConnectionRegistry::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub source: SourceId,
    pub source_node: NodeId,
}

/// The registry's view of one playable source wired into the graph.
#[derive(Debug)]
struct GraphConnection {
    source_node: NodeId,
    filters: Vec<NodeId>,
    shared_analyser: Option<NodeId>,
    taps: Vec<NodeId>,
    ref_count: usize,
}

impl GraphConnection {
    /// Node the audible chain ends with before the destination; taps hang off it.
    fn tail(&self) -> NodeId {
        self.filters.last().copied().unwrap_or(self.source_node)
    }
}

/// Reference-counted broker owning at most one graph connection per playable
/// source.
///
/// A source node can only be created once, so every consumer attached to the
/// same source shares one connection while owning its own analyser tap. The
/// connection is torn down when the last consumer releases it.
pub struct GraphConnectionRegistry {
    backend: Arc<dyn AudioGraphBackend>,
    connections: Mutex<HashMap<SourceId, GraphConnection>>,
}

impl GraphConnectionRegistry {
    pub fn new(backend: Arc<dyn AudioGraphBackend>) -> Self {
        Self {
            backend,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn AudioGraphBackend> {
        &self.backend
    }

    /// Returns the connection for `source`, creating it on first use.
    ///
    /// `None` means the source cannot be visualised (bound to a foreign graph
    /// or the hookup failed); callers skip visualisation.
    pub fn acquire(&self, source: &SourceId) -> Option<ConnectionHandle> {
        let mut connections = match self.lock() {
            Ok(connections) => connections,
            Err(err) => {
                warn!(%source, error = %err, "graph registry unavailable");
                return None;
            }
        };

        if let Some(connection) = connections.get_mut(source) {
            connection.ref_count += 1;
            debug!(%source, refs = connection.ref_count, "reusing graph connection");
            return Some(ConnectionHandle {
                source: source.clone(),
                source_node: connection.source_node,
            });
        }

        let source_node = match self.backend.create_source_node(source) {
            Ok(node) => node,
            Err(err @ VisualiserError::GraphUnavailable { .. }) => {
                debug!(%source, error = %err, "source owned by another graph, skipping");
                return None;
            }
            Err(err) => {
                warn!(%source, error = %err, "failed to create source node");
                return None;
            }
        };

        if let Err(err) = self.backend.connect(source_node, self.backend.destination()) {
            warn!(%source, error = %err, "failed to wire source to destination");
            self.backend.release_node(source_node);
            return None;
        }

        connections.insert(
            source.clone(),
            GraphConnection {
                source_node,
                filters: Vec::new(),
                shared_analyser: None,
                taps: Vec::new(),
                ref_count: 1,
            },
        );
        debug!(%source, "created graph connection");

        Some(ConnectionHandle {
            source: source.clone(),
            source_node,
        })
    }

    /// Drops one reference; the last release disconnects every node of the
    /// connection and forgets it. Unknown sources are ignored.
    pub fn release(&self, source: &SourceId) {
        let Ok(mut connections) = self.lock() else {
            return;
        };
        let Some(connection) = connections.get_mut(source) else {
            return;
        };

        connection.ref_count = connection.ref_count.saturating_sub(1);
        if connection.ref_count > 0 {
            debug!(%source, refs = connection.ref_count, "released graph connection");
            return;
        }

        if let Some(connection) = connections.remove(source) {
            let nodes = connection
                .taps
                .iter()
                .chain(connection.shared_analyser.iter())
                .chain(connection.filters.iter())
                .chain(std::iter::once(&connection.source_node));
            for &node in nodes {
                self.backend.disconnect(node);
                self.backend.release_node(node);
            }
            debug!(%source, "tore down graph connection");
        }
    }

    /// Verifies that `source → filters… → destination` is linked in series and
    /// repairs any missing edge. Re-linking an existing edge is a no-op.
    pub fn ensure_chain_complete(&self, source: &SourceId) -> Result<()> {
        let connections = self.lock()?;
        let connection = connections
            .get(source)
            .ok_or_else(|| not_initialized(source))?;

        let chain = std::iter::once(connection.source_node)
            .chain(connection.filters.iter().copied())
            .chain(std::iter::once(self.backend.destination()))
            .collect::<Vec<_>>();
        for pair in chain.windows(2) {
            if !self.backend.is_connected(pair[0], pair[1]) {
                self.backend.connect(pair[0], pair[1])?;
            }
        }
        Ok(())
    }

    /// Replaces the filter chain of `source` without interrupting playback.
    ///
    /// The new filters and the taps' new edges are linked alongside the live
    /// chain first; the source switches over only once every edge exists. On
    /// failure the current chain keeps playing and the new nodes are freed.
    pub fn install_filters(&self, source: &SourceId, specs: &[FilterSpec]) -> Result<()> {
        let mut connections = self.lock()?;
        let connection = connections
            .get_mut(source)
            .ok_or_else(|| not_initialized(source))?;

        let mut filters = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.backend.create_filter(spec) {
                Ok(node) => filters.push(node),
                Err(err) => {
                    self.release_nodes(&filters);
                    return Err(err);
                }
            }
        }

        let destination = self.backend.destination();
        let old_head = connection.filters.first().copied().unwrap_or(destination);
        let old_tail = connection.tail();
        let new_head = filters.first().copied().unwrap_or(destination);
        let new_tail = filters.last().copied().unwrap_or(connection.source_node);
        let observers = connection
            .taps
            .iter()
            .chain(connection.shared_analyser.iter())
            .copied()
            .collect::<Vec<_>>();

        let mut edges = filters
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .collect::<Vec<_>>();
        edges.push((new_tail, destination));
        edges.extend(observers.iter().map(|&tap| (new_tail, tap)));
        edges.push((connection.source_node, new_head));

        let mut added = Vec::with_capacity(edges.len());
        for (from, to) in edges {
            if self.backend.is_connected(from, to) {
                continue;
            }
            if let Err(err) = self.backend.connect(from, to) {
                warn!(%source, error = %err, "filter chain hookup failed, keeping the current chain");
                for &(from, to) in &added {
                    self.backend.disconnect_edge(from, to);
                }
                self.release_nodes(&filters);
                return Err(err);
            }
            added.push((from, to));
        }

        if old_head != new_head {
            self.backend.disconnect_edge(connection.source_node, old_head);
        }
        if old_tail != new_tail {
            for &tap in &observers {
                self.backend.disconnect_edge(old_tail, tap);
            }
        }
        let replaced = std::mem::replace(&mut connection.filters, filters);
        self.release_nodes(&replaced);

        debug!(%source, filters = specs.len(), "installed filter chain");
        Ok(())
    }

    /// Hangs `tap` in parallel off the end of the chain. The tap is never
    /// connected onwards, so it cannot alter what is heard.
    pub fn attach_tap(&self, source: &SourceId, tap: NodeId) -> Result<()> {
        let mut connections = self.lock()?;
        let connection = connections
            .get_mut(source)
            .ok_or_else(|| not_initialized(source))?;

        self.backend.connect(connection.tail(), tap)?;
        if !connection.taps.contains(&tap) {
            connection.taps.push(tap);
        }
        Ok(())
    }

    /// Unhooks and frees a tap previously attached with [`Self::attach_tap`].
    pub fn detach_tap(&self, source: &SourceId, tap: NodeId) {
        if let Ok(mut connections) = self.lock() {
            if let Some(connection) = connections.get_mut(source) {
                connection.taps.retain(|&node| node != tap);
            }
        }
        self.backend.release_node(tap);
    }

    /// Lazily creates the connection's shared default analyser.
    pub fn ensure_shared_analyser(
        &self,
        source: &SourceId,
        options: &AnalyserOptions,
    ) -> Result<NodeId> {
        let mut connections = self.lock()?;
        let connection = connections
            .get_mut(source)
            .ok_or_else(|| not_initialized(source))?;

        if let Some(node) = connection.shared_analyser {
            return Ok(node);
        }
        let node = self.backend.create_analyser(options)?;
        if let Err(err) = self.backend.connect(connection.tail(), node) {
            self.backend.release_node(node);
            return Err(err);
        }
        connection.shared_analyser = Some(node);
        Ok(node)
    }

    pub fn ref_count(&self, source: &SourceId) -> usize {
        self.lock()
            .ok()
            .and_then(|connections| connections.get(source).map(|c| c.ref_count))
            .unwrap_or(0)
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.ref_count(source) > 0
    }

    pub fn len(&self) -> usize {
        self.lock().map(|connections| connections.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_nodes(&self, nodes: &[NodeId]) {
        for &node in nodes {
            self.backend.release_node(node);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SourceId, GraphConnection>>> {
        self.connections
            .lock()
            .map_err(|_| VisualiserError::msg("graph registry has been poisoned"))
    }
}

fn not_initialized(source: &SourceId) -> VisualiserError {
    VisualiserError::NotInitialized {
        source_id: source.clone(),
    }
}

impl std::fmt::Debug for GraphConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}
