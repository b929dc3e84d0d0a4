//! Frame compositing: trails, glows and sparkles over a fading background.

use std::f32::consts::TAU;

use glam::Vec2;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    analysis::AudioMetrics, config::RenderConfig, particles::Particle, scene::FlowScene,
};

mod pixel;
mod surface;

pub use pixel::PixelSurface;
pub use surface::{BlendMode, DrawCommand, RecordingSurface, Rgba, Surface};

const AMBIENT_TIME_STEP: f32 = 0.01;
const BACKDROP: Rgba = Rgba::new(0.02, 0.02, 0.06, 1.0);

/// Draws one [`FlowScene`] per display frame onto a [`Surface`].
///
/// The previous frame is never cleared, only veiled with a translucent dark
/// fill, so moving shapes leave fading streaks.
#[derive(Debug)]
pub struct Renderer<S: Surface> {
    surface: S,
    config: RenderConfig,
    hue: f32,
    time: f32,
    rng: StdRng,
}

impl<S: Surface> Renderer<S> {
    pub fn new(surface: S, config: RenderConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            surface,
            config,
            hue: 0.0,
            time: 0.0,
            rng,
        }
    }

    /// Renders one frame from the analyser bytes and returns the metrics it
    /// derived. `buffer_length` is the analyser's bin count.
    pub fn render_frame(
        &mut self,
        scene: &mut FlowScene,
        frequency: &[u8],
        buffer_length: usize,
    ) -> AudioMetrics {
        let metrics = AudioMetrics::from_frequency_bytes(frequency, buffer_length);
        self.hue = (self.hue + 0.2 + 0.5 * metrics.bass) % 360.0;
        self.time += AMBIENT_TIME_STEP;

        let size = Vec2::new(self.surface.width(), self.surface.height());
        self.surface.fill_rect(
            Vec2::ZERO,
            size,
            BACKDROP.with_alpha(0.05 + 0.03 * metrics.intensity),
            BlendMode::SourceOver,
        );
        self.draw_ambient(size, &metrics);

        scene
            .field
            .update(metrics.intensity, metrics.bass, metrics.mid);
        let FlowScene { field, particles } = scene;
        for index in 0..particles.len() {
            particles.advance(index, field, metrics.intensity, metrics.treble);
            if let Some(particle) = particles.get(index) {
                self.draw_particle(particle, metrics.intensity);
            }
        }

        if metrics.treble > self.config.sparkle_threshold
            && self.rng.gen::<f32>() < self.config.sparkle_probability
        {
            self.draw_sparkle(size);
        }

        metrics
    }

    /// Resizes the surface and rebuilds the scene for it. Must not run while a
    /// frame is being rendered.
    pub fn resize(&mut self, scene: &mut FlowScene, width: f32, height: f32) {
        self.surface.resize(width, height);
        scene.resize(width, height);
    }

    pub fn hue(&self) -> f32 {
        self.hue
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Three large additive glows orbiting the centre, 120° apart.
    fn draw_ambient(&mut self, size: Vec2, metrics: &AudioMetrics) {
        let short = size.x.min(size.y);
        let centre = size * 0.5;
        for i in 0..3 {
            let phase = self.time * 0.3 + i as f32 * TAU / 3.0;
            let position = centre + Vec2::from_angle(phase) * short * 0.25;
            let hue = self.hue + 120.0 * i as f32;
            self.surface.radial_glow(
                position,
                short * (0.35 + 0.15 * metrics.bass),
                Rgba::from_hsla(hue, 0.7, 0.5, 0.04 + 0.08 * metrics.intensity),
                Rgba::from_hsla(hue, 0.7, 0.5, 0.0),
                BlendMode::Lighter,
            );
        }
    }

    fn draw_particle(&mut self, particle: &Particle, audio: f32) {
        let hue = self.hue + particle.hue_offset;
        let life = particle.life_fraction();

        if particle.trail.len() > 1 {
            self.surface.stroke_trail(
                &particle.trail,
                particle.size * (0.5 + audio),
                Rgba::from_hsla(hue, 0.8, 0.6, 0.6 * life),
                BlendMode::SourceOver,
            );
        }

        self.surface.radial_glow(
            particle.position,
            particle.size * (3.0 + 4.0 * audio),
            Rgba::from_hsla(hue, 1.0, 0.7, life * (0.3 + 0.4 * audio)),
            Rgba::from_hsla(hue, 1.0, 0.7, 0.0),
            BlendMode::Lighter,
        );
        self.surface.fill_circle(
            particle.position,
            particle.size * 0.6,
            Rgba::from_hsla(hue, 1.0, 0.9, 0.5 + 0.5 * life),
            BlendMode::SourceOver,
        );
    }

    fn draw_sparkle(&mut self, size: Vec2) {
        let position = Vec2::new(self.rng.gen::<f32>(), self.rng.gen::<f32>()) * size;
        let radius = 4.0 + self.rng.gen::<f32>() * 8.0;
        self.surface.radial_glow(
            position,
            radius,
            Rgba::from_hsla(self.hue, 1.0, 0.95, 0.9),
            Rgba::from_hsla(self.hue, 1.0, 0.95, 0.0),
            BlendMode::Lighter,
        );
        self.surface.fill_circle(
            position,
            1.5,
            Rgba::new(1.0, 1.0, 1.0, 1.0),
            BlendMode::Lighter,
        );
    }
}
