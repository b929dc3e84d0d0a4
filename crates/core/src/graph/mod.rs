//! Audio graph plumbing.
//!
//! The platform audio subsystem is an external collaborator reached through
//! [`AudioGraphBackend`]. [`GraphConnectionRegistry`] brokers one connection
//! per playable source on top of it, and [`SoftwareAudioGraph`] is the
//! in-memory backend used by the command line driver and the tests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, VisualiserError};

mod registry;
mod software;

pub use registry::{ConnectionHandle, GraphConnectionRegistry};
pub use software::{DestinationStats, SoftwareAudioGraph};

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32_768;

/// Identity of a playable source. Used as the registry key and as the origin
/// of the processing graph; playback itself is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque handle to a node living inside an [`AudioGraphBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Lifecycle of the processing context. Contexts start suspended until a user
/// gesture allows them to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// Configuration of a read-only analyser node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: 128,
            smoothing_time_constant: 0.8,
            min_decibels: -90.0,
            max_decibels: -10.0,
        }
    }
}

impl AnalyserOptions {
    /// Number of frequency bins exposed by an analyser with these options.
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || self.fft_size < MIN_FFT_SIZE
            || self.fft_size > MAX_FFT_SIZE
        {
            return Err(VisualiserError::InvalidInput(
                "fft size must be a power of two between 32 and 32768",
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(VisualiserError::InvalidInput(
                "smoothing time constant must lie in [0, 1]",
            ));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(VisualiserError::InvalidInput(
                "min decibels must be below max decibels",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    LowShelf,
    Peaking,
    HighShelf,
}

/// One equaliser stage. Filters are installed by the playback collaborator;
/// the visualiser only keeps the chain intact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

impl FilterSpec {
    pub fn peaking(frequency: f32, gain_db: f32) -> Self {
        Self {
            kind: FilterKind::Peaking,
            frequency,
            gain_db,
            q: 1.0,
        }
    }
}

/// Operations consumed from the platform audio subsystem.
///
/// Implementations use interior mutability; every method takes `&self` so a
/// backend can be shared between the registry and any number of taps.
pub trait AudioGraphBackend: Send + Sync {
    /// Creates the node that carries `source` into the graph. Fails with
    /// [`VisualiserError::GraphUnavailable`] when the source is already bound
    /// to another graph.
    fn create_source_node(&self, source: &SourceId) -> Result<NodeId>;

    fn create_filter(&self, spec: &FilterSpec) -> Result<NodeId>;

    fn create_analyser(&self, options: &AnalyserOptions) -> Result<NodeId>;

    /// The playback destination every chain terminates at.
    fn destination(&self) -> NodeId;

    /// Connects `from` into `to`. Connecting an already connected pair is a
    /// no-op.
    fn connect(&self, from: NodeId, to: NodeId) -> Result<()>;

    fn is_connected(&self, from: NodeId, to: NodeId) -> bool;

    /// Removes every outgoing edge of `node`.
    fn disconnect(&self, node: NodeId);

    /// Removes the single edge `from → to`, if present.
    fn disconnect_edge(&self, from: NodeId, to: NodeId);

    /// Disconnects `node` everywhere and frees it.
    fn release_node(&self, node: NodeId);

    fn frequency_bytes(&self, analyser: NodeId, out: &mut [u8]) -> Result<()>;

    fn time_domain_bytes(&self, analyser: NodeId, out: &mut [u8]) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn context_state(&self) -> ContextState;

    fn resume(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_expose_half_the_fft_size() {
        let options = AnalyserOptions::default();
        assert_eq!(options.fft_size, 128);
        assert_eq!(options.frequency_bin_count(), 64);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_options() {
        let mut options = AnalyserOptions {
            fft_size: 100,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        options.fft_size = 65_536;
        assert!(options.validate().is_err());

        options.fft_size = 32;
        options.smoothing_time_constant = 1.5;
        assert!(options.validate().is_err());

        options.smoothing_time_constant = 0.0;
        options.min_decibels = -10.0;
        assert!(options.validate().is_err());
    }
}
