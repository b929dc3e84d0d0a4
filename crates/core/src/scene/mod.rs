use crate::{config::VisualiserConfig, field::FlowField, particles::ParticleSystem};

/// Simulation state of the flow-field visual: the grid and the particle pool
/// it steers. Both are sized to the drawable surface and rebuilt together.
#[derive(Debug, Clone)]
pub struct FlowScene {
    pub field: FlowField,
    pub particles: ParticleSystem,
}

impl FlowScene {
    pub fn new(width: f32, height: f32, config: &VisualiserConfig) -> Self {
        Self {
            field: FlowField::new(width, height, config.field.clone()),
            particles: ParticleSystem::new(width, height, config.particles.clone()),
        }
    }

    /// Replaces the grid and every particle for the new size in one step.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.field.resize(width, height);
        self.particles.resize(width, height);
    }

    pub fn width(&self) -> f32 {
        self.field.width()
    }

    pub fn height(&self) -> f32 {
        self.field.height()
    }
}
