use std::f32::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};

const BPM: f32 = 120.0;
const CHORD: [f32; 3] = [220.0, 277.18, 329.63];

/// Synthesised stand-in for a playing track: four-on-the-floor kick, a
/// pulsing bass line, a slowly swelling chord and off-beat hats, so every
/// band of the spectrum moves.
#[derive(Debug)]
pub struct DemoSignal {
    sample_rate: f32,
    position: u64,
    rng: StdRng,
}

impl DemoSignal {
    pub fn new(sample_rate: u32, seed: u64) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            position: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Renders the next block of mono samples.
    pub fn next_block(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.next_sample()).collect()
    }

    fn next_sample(&mut self) -> f32 {
        let t = self.position as f32 / self.sample_rate;
        self.position += 1;

        let beat = 60.0 / BPM;
        let in_beat = t % beat;
        let kick_env = (-in_beat * 18.0).exp();
        let kick = (TAU * (45.0 + 80.0 * kick_env) * in_beat).sin() * kick_env;

        let bass_env = (-(t % (beat / 2.0)) * 6.0).exp();
        let bass = (TAU * 55.0 * t).sin().signum() * 0.25 * bass_env;

        let swell = 0.5 + 0.5 * (TAU * t / 8.0).sin();
        let chord = CHORD.iter().map(|f| (TAU * f * t).sin()).sum::<f32>() / CHORD.len() as f32
            * 0.3
            * swell;

        let off_beat = (t + beat / 2.0) % beat;
        let hat_env = (-off_beat * 60.0).exp();
        let hat = (self.rng.gen::<f32>() * 2.0 - 1.0) * hat_env * 0.35;

        (0.6 * kick + bass + chord + hat).clamp(-1.0, 1.0)
    }
}
