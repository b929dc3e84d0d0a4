use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{graph::AnalyserOptions, Result, VisualiserError};

/// Top-level configuration structure for the visualiser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualiserConfig {
    pub analyser: AnalyserOptions,
    pub field: FlowFieldConfig,
    pub particles: ParticleConfig,
    pub render: RenderConfig,
}

impl VisualiserConfig {
    /// Parses a JSON document; absent keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyser.validate()?;
        if self.field.cell_size <= 0.0 {
            return Err(VisualiserError::InvalidInput("cell size must be positive"));
        }
        if self.particles.area_per_particle <= 0.0 {
            return Err(VisualiserError::InvalidInput(
                "area per particle must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.render.sparkle_probability) {
            return Err(VisualiserError::InvalidInput(
                "sparkle probability must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Tuning of the flow-field update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowFieldConfig {
    /// Edge length of one grid cell in surface units.
    pub cell_size: f32,
    /// Noise coordinates advanced per cell.
    pub noise_scale: f32,
    /// Noise time advanced per update.
    pub time_step: f32,
    /// Offset that decorrelates the fine octave from the base octave.
    pub octave_offset: f32,
    /// Phase added to the coarse octave per unit of bass.
    pub bass_phase: f32,
    /// Angular speed of the vortex centre per unit of field time.
    pub vortex_speed: f32,
    /// Orbit radius of the vortex centre as a fraction of each dimension.
    pub vortex_orbit: f32,
    /// Vortex reach as a fraction of the shorter dimension.
    pub vortex_reach: f32,
    /// Maximum share of the angle taken over by the vortex.
    pub vortex_blend: f32,
}

impl Default for FlowFieldConfig {
    fn default() -> Self {
        Self {
            cell_size: 40.0,
            noise_scale: 0.1,
            time_step: 0.01,
            octave_offset: 100.0,
            bass_phase: 2.0,
            vortex_speed: 0.5,
            vortex_orbit: 0.3,
            vortex_reach: 0.5,
            vortex_blend: 0.7,
        }
    }
}

/// Particle pool sizing and physics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub max_particles: usize,
    /// Surface area that earns one particle.
    pub area_per_particle: f32,
    /// Distance beyond each edge before a particle wraps.
    pub wrap_margin: f32,
    pub damping: f32,
    pub seed: u64,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            max_particles: 800,
            area_per_particle: 1_000.0,
            wrap_margin: 50.0,
            damping: 0.98,
            seed: 0x00F1_0F1E,
        }
    }
}

/// Compositing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Per-frame chance of a sparkle while treble is above the threshold.
    /// Applied per tick, so the sparkle rate scales with the host frame rate.
    pub sparkle_probability: f32,
    pub sparkle_threshold: f32,
    pub seed: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sparkle_probability: 0.3,
            sparkle_threshold: 0.6,
            seed: 0x5CA7_7E12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config =
            VisualiserConfig::from_json_str(r#"{ "analyser": { "fft_size": 256 }, "particles": { "seed": 7 } }"#)
                .unwrap();
        assert_eq!(config.analyser.fft_size, 256);
        assert_eq!(config.analyser.smoothing_time_constant, 0.8);
        assert_eq!(config.particles.seed, 7);
        assert_eq!(config.particles.max_particles, 800);
        assert_eq!(config.field.cell_size, 40.0);
    }

    #[test]
    fn rejects_invalid_documents() {
        assert!(matches!(
            VisualiserConfig::from_json_str("{ not json"),
            Err(VisualiserError::Config(_))
        ));
        assert!(matches!(
            VisualiserConfig::from_json_str(r#"{ "analyser": { "fft_size": 48 } }"#),
            Err(VisualiserError::InvalidInput(_))
        ));
        assert!(VisualiserConfig::from_json_str(r#"{ "field": { "cell_size": 0 } }"#).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = VisualiserConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(VisualiserConfig::from_json_str(&json).unwrap(), config);
    }
}
