//! Core library for the Flowfield Visualiser.
//!
//! The crate taps a live playback graph without disturbing it, turns each
//! frame's spectrum into loudness and band metrics, and uses them to drive a
//! noise-and-vortex flow field that steers a bounded particle population.
//! Modules, leaves first:
//!
//! - [`graph`]: the platform audio graph seam and the per-source connection
//!   registry.
//! - [`audio`]: gesture-gated analysis taps with a cancellable frame pump.
//! - [`noise`], [`field`], [`particles`]: the simulation.
//! - [`render`]: compositing onto a drawable surface.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod field;
pub mod graph;
pub mod noise;
pub mod particles;
pub mod render;
pub mod scene;
pub mod timeline;

pub use analysis::{AudioMetrics, SpectrumAnalyser};
pub use audio::{
    AnalysisFrameSource, FrameSourceState, GestureGate, GestureKind, InitOutcome,
};
pub use config::{FlowFieldConfig, ParticleConfig, RenderConfig, VisualiserConfig};
pub use error::{Result, VisualiserError};
pub use field::{FlowField, FlowVector};
pub use graph::{
    AnalyserOptions, AudioGraphBackend, ConnectionHandle, ContextState, FilterKind, FilterSpec,
    GraphConnectionRegistry, NodeId, SoftwareAudioGraph, SourceId,
};
pub use particles::{Particle, ParticleSystem, TrailPoint};
pub use render::{BlendMode, DrawCommand, PixelSurface, RecordingSurface, Renderer, Rgba, Surface};
pub use scene::FlowScene;
pub use timeline::{FrameClock, FrameRequestId, FrameScheduler, ManualFrameScheduler};
