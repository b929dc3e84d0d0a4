use glam::Vec2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{config::ParticleConfig, field::FlowField};

const BASE_TRAIL: f32 = 15.0;
const AUDIO_TRAIL: f32 = 25.0;
const BASE_SPEED: f32 = 3.0;
const AUDIO_SPEED: f32 = 4.0;
const BASE_FLOW_GAIN: f32 = 0.3;
const AUDIO_FLOW_GAIN: f32 = 0.4;
const CENTRE_PULL: f32 = 0.02;

/// One recorded trail position; `alpha` is the particle's remaining life
/// fraction at the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub x: f32,
    pub y: f32,
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub size: f32,
    /// Degrees added to the global hue.
    pub hue_offset: f32,
    /// Remaining ticks, `0 <= life <= max_life`.
    pub life: f32,
    pub max_life: f32,
    /// Oldest first.
    pub trail: Vec<TrailPoint>,
}

impl Particle {
    pub fn life_fraction(&self) -> f32 {
        if self.max_life > 0.0 {
            self.life / self.max_life
        } else {
            0.0
        }
    }
}

/// Fixed-size particle pool advected through a [`FlowField`].
///
/// Particles are never removed: expired ones respawn in place, and the whole
/// pool is rebuilt when the surface is resized.
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    config: ParticleConfig,
    width: f32,
    height: f32,
    particles: Vec<Particle>,
    rng: StdRng,
}

impl ParticleSystem {
    pub fn new(width: f32, height: f32, config: ParticleConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let mut system = Self {
            config,
            width: 0.0,
            height: 0.0,
            particles: Vec::new(),
            rng,
        };
        system.resize(width, height);
        system
    }

    /// Pool size for a surface: one particle per configured area, capped.
    pub fn pool_size(width: f32, height: f32, config: &ParticleConfig) -> usize {
        let area = (width.max(0.0) * height.max(0.0)) as f64;
        let count = (area / config.area_per_particle as f64).floor() as usize;
        count.min(config.max_particles)
    }

    /// Longest trail allowed at the given audio intensity.
    pub fn trail_cap(audio: f32) -> usize {
        (BASE_TRAIL + AUDIO_TRAIL * audio.clamp(0.0, 1.0)).floor() as usize
    }

    /// Re-creates every particle for the new surface size.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        let count = Self::pool_size(self.width, self.height, &self.config);
        let (width, height, rng) = (self.width, self.height, &mut self.rng);
        self.particles = (0..count).map(|_| spawn(rng, width, height)).collect();
    }

    /// Moves particle `index` one tick through `field`.
    ///
    /// Velocity picks up the local flow and a treble-driven pull toward the
    /// centre, is damped and speed-limited; the trail records the previous
    /// position; axes wrap independently past the margin; expired particles
    /// respawn with zero velocity and an empty trail.
    pub fn advance(&mut self, index: usize, field: &FlowField, audio: f32, treble: f32) {
        let (width, height) = (self.width, self.height);
        let margin = self.config.wrap_margin;
        let damping = self.config.damping;
        let Some(particle) = self.particles.get_mut(index) else {
            return;
        };

        if let Some(flow) = field.vector_at(particle.position.x, particle.position.y) {
            particle.velocity +=
                flow.direction() * flow.magnitude * (BASE_FLOW_GAIN + AUDIO_FLOW_GAIN * audio);
        }

        let to_centre = Vec2::new(width, height) * 0.5 - particle.position;
        particle.velocity += to_centre.normalize_or_zero() * treble * CENTRE_PULL;

        particle.velocity *= damping;
        particle.velocity = particle
            .velocity
            .clamp_length_max(BASE_SPEED + AUDIO_SPEED * audio);

        particle.trail.push(TrailPoint {
            x: particle.position.x,
            y: particle.position.y,
            alpha: particle.life_fraction(),
        });
        let cap = Self::trail_cap(audio);
        if particle.trail.len() > cap {
            let excess = particle.trail.len() - cap;
            particle.trail.drain(..excess);
        }

        particle.position += particle.velocity;
        particle.life = (particle.life - 1.0).max(0.0);
        particle.position.x = wrap(particle.position.x, width, margin);
        particle.position.y = wrap(particle.position.y, height, margin);

        if particle.life <= 0.0 {
            let fresh = spawn(&mut self.rng, width, height);
            self.particles[index] = fresh;
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn get(&self, index: usize) -> Option<&Particle> {
        self.particles.get(index)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }
}

fn spawn(rng: &mut StdRng, width: f32, height: f32) -> Particle {
    let max_life = rng.gen_range(100.0..300.0_f32).floor();
    Particle {
        position: Vec2::new(
            rng.gen::<f32>() * width,
            rng.gen::<f32>() * height,
        ),
        velocity: Vec2::ZERO,
        size: rng.gen_range(1.0..3.0),
        hue_offset: rng.gen_range(0.0..60.0),
        life: max_life,
        max_life,
        trail: Vec::new(),
    }
}

/// Teleports a coordinate that left `[-margin, extent + margin]` to the
/// opposite edge.
fn wrap(value: f32, extent: f32, margin: f32) -> f32 {
    if value > extent + margin {
        -margin
    } else if value < -margin {
        extent + margin
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowFieldConfig;

    fn system(width: f32, height: f32) -> (ParticleSystem, FlowField) {
        (
            ParticleSystem::new(width, height, ParticleConfig::default()),
            FlowField::new(width, height, FlowFieldConfig::default()),
        )
    }

    #[test]
    fn pool_size_scales_with_area_and_caps() {
        let config = ParticleConfig::default();
        assert_eq!(ParticleSystem::pool_size(400.0, 300.0, &config), 120);
        assert_eq!(ParticleSystem::pool_size(1920.0, 1080.0, &config), 800);
        assert_eq!(ParticleSystem::pool_size(10.0, 10.0, &config), 0);

        let (mut particles, _) = system(400.0, 300.0);
        assert_eq!(particles.len(), 120);
        particles.resize(100.0, 100.0);
        assert_eq!(particles.len(), 10);
    }

    #[test]
    fn spawned_particles_start_inside_the_surface() {
        let (particles, _) = system(640.0, 480.0);
        for p in particles.particles() {
            assert!((0.0..=640.0).contains(&p.position.x));
            assert!((0.0..=480.0).contains(&p.position.y));
            assert_eq!(p.life, p.max_life);
            assert!((100.0..300.0).contains(&p.max_life));
            assert!((1.0..3.0).contains(&p.size));
            assert!(p.trail.is_empty());
        }
    }

    #[test]
    fn invariants_hold_over_many_ticks() {
        let (mut particles, mut field) = system(320.0, 240.0);
        for tick in 0..600 {
            let audio = ((tick as f32) * 0.05).sin().abs();
            let treble = ((tick as f32) * 0.031).cos().abs();
            field.update(audio, 0.5, treble);
            for i in 0..particles.len() {
                particles.advance(i, &field, audio, treble);
                let p = particles.get(i).unwrap();
                assert!(p.life >= 0.0 && p.life <= p.max_life);
                assert!(p.trail.len() <= ParticleSystem::trail_cap(audio));
                assert!((-50.0..=370.0).contains(&p.position.x));
                assert!((-50.0..=290.0).contains(&p.position.y));
                assert!(p.velocity.length() <= 7.0 + 1e-4);
            }
        }
    }

    #[test]
    fn expired_particles_respawn_in_place() {
        let (mut particles, mut field) = system(200.0, 200.0);
        field.update(1.0, 0.0, 0.0);
        particles.particles[0].life = 1.0;
        particles.particles[0].trail.push(TrailPoint {
            x: 1.0,
            y: 1.0,
            alpha: 1.0,
        });

        particles.advance(0, &field, 1.0, 0.0);
        let p = particles.get(0).unwrap();
        assert_eq!(p.life, p.max_life);
        assert_eq!(p.velocity, Vec2::ZERO);
        assert!(p.trail.is_empty());
        assert!((0.0..=200.0).contains(&p.position.x));
        assert!((0.0..=200.0).contains(&p.position.y));
        assert_eq!(particles.len(), 40);
    }

    #[test]
    fn positions_teleport_across_the_margin() {
        assert_eq!(wrap(351.0, 300.0, 50.0), -50.0);
        assert_eq!(wrap(-50.5, 300.0, 50.0), 350.0);
        assert_eq!(wrap(-50.0, 300.0, 50.0), -50.0);
        assert_eq!(wrap(120.0, 300.0, 50.0), 120.0);
    }

    #[test]
    fn trails_shrink_when_audio_drops() {
        let (mut particles, mut field) = system(200.0, 200.0);
        particles.particles[0].life = 1_000.0;
        particles.particles[0].max_life = 1_000.0;
        field.update(1.0, 0.0, 0.0);
        for _ in 0..60 {
            particles.advance(0, &field, 1.0, 0.0);
        }
        assert_eq!(particles.get(0).unwrap().trail.len(), 40);

        particles.advance(0, &field, 0.0, 0.0);
        assert_eq!(particles.get(0).unwrap().trail.len(), 15);
    }

    #[test]
    fn treble_pulls_still_particles_toward_the_centre() {
        let (mut particles, _) = system(400.0, 400.0);
        let empty = FlowField::new(0.0, 0.0, FlowFieldConfig::default());
        particles.particles[0].position = Vec2::new(100.0, 200.0);
        particles.advance(0, &empty, 0.0, 1.0);
        let p = particles.get(0).unwrap();
        assert!(p.velocity.x > 0.0);
        assert!(p.velocity.y.abs() < 1e-6);
    }

    #[test]
    fn same_seed_same_pool() {
        let (a, _) = system(300.0, 300.0);
        let (b, _) = system(300.0, 300.0);
        assert_eq!(a.particles(), b.particles());
    }
}
