use std::f32::consts::PI;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{config::FlowFieldConfig, noise::noise};

const OCTAVE_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];

/// Direction and strength of the flow in one grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowVector {
    /// Radians.
    pub angle: f32,
    pub magnitude: f32,
}

impl FlowVector {
    pub fn direction(&self) -> Vec2 {
        Vec2::from_angle(self.angle)
    }
}

/// Grid of flow vectors recomputed every frame from layered noise and an
/// orbiting vortex.
///
/// Quiet passages leave the field noise-dominated and turbulent; mid-band
/// energy swings the vortex around and pulls nearby cells into rotation.
#[derive(Debug, Clone)]
pub struct FlowField {
    config: FlowFieldConfig,
    width: f32,
    height: f32,
    rows: usize,
    cols: usize,
    cells: Vec<FlowVector>,
    time: f32,
    vortex: Vec2,
}

impl FlowField {
    pub fn new(width: f32, height: f32, config: FlowFieldConfig) -> Self {
        let mut field = Self {
            config,
            width: 0.0,
            height: 0.0,
            rows: 0,
            cols: 0,
            cells: Vec::new(),
            time: 0.0,
            vortex: Vec2::ZERO,
        };
        field.resize(width, height);
        field
    }

    /// Rebuilds the grid for a new surface size. All cells reset.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        self.cols = (self.width / self.config.cell_size).ceil() as usize;
        self.rows = (self.height / self.config.cell_size).ceil() as usize;
        self.cells = vec![FlowVector::default(); self.rows * self.cols];
        self.vortex = Vec2::new(self.width, self.height) * 0.5;
    }

    /// Advances field time and recomputes every cell from the frame's audio
    /// intensities (each in [0, 1]).
    pub fn update(&mut self, audio: f32, bass: f32, mid: f32) {
        let cfg = &self.config;
        self.time += cfg.time_step;
        let t = self.time;

        let phase = t * cfg.vortex_speed + mid * PI;
        let size = Vec2::new(self.width, self.height);
        self.vortex = size * 0.5 + Vec2::new(phase.cos(), phase.sin()) * size * cfg.vortex_orbit;
        let reach = cfg.vortex_reach * self.width.min(self.height);
        let gain = 1.0 + 2.0 * audio;

        for row in 0..self.rows {
            for col in 0..self.cols {
                let nx = col as f32 * cfg.noise_scale;
                let ny = row as f32 * cfg.noise_scale;
                let octaves = [
                    noise(nx, ny, t),
                    noise(
                        nx * 2.0 + cfg.octave_offset,
                        ny * 2.0 + cfg.octave_offset,
                        t * 1.5,
                    ),
                    noise(nx * 0.5, ny * 0.5, t * 0.5 + bass * cfg.bass_phase),
                ];
                let combined = octaves
                    .iter()
                    .zip(OCTAVE_WEIGHTS)
                    .map(|(n, w)| n * w)
                    .sum::<f32>()
                    * gain;

                let centre = (Vec2::new(col as f32, row as f32) + 0.5) * cfg.cell_size;
                let offset = centre - self.vortex;
                let influence = if reach > 0.0 {
                    (1.0 - offset.length() / reach).clamp(0.0, 1.0)
                } else {
                    0.0
                };

                let base_angle = combined * 4.0 * PI;
                let tangential = offset.y.atan2(offset.x) + PI / 2.0;
                let blend = cfg.vortex_blend * influence;

                self.cells[row * self.cols + col] = FlowVector {
                    angle: base_angle * (1.0 - blend) + tangential * blend,
                    magnitude: 0.5 + 1.5 * audio + 0.5 * influence,
                };
            }
        }
    }

    /// Vector of the cell containing `(x, y)`, if the point lies on the grid.
    pub fn vector_at(&self, x: f32, y: f32) -> Option<FlowVector> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let col = (x / self.config.cell_size) as usize;
        let row = (y / self.config.cell_size) as usize;
        self.cell(row, col)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<FlowVector> {
        if row < self.rows && col < self.cols {
            Some(self.cells[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn cells(&self) -> &[FlowVector] {
        &self.cells
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn vortex_center(&self) -> Vec2 {
        self.vortex
    }

    pub fn config(&self) -> &FlowFieldConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(width: f32, height: f32) -> FlowField {
        FlowField::new(width, height, FlowFieldConfig::default())
    }

    #[test]
    fn grid_dimensions_round_up() {
        let mut field = field(810.0, 600.0);
        assert_eq!(field.cols(), 21);
        assert_eq!(field.rows(), 15);
        assert_eq!(field.cells().len(), 21 * 15);

        field.resize(40.0, 1.0);
        assert_eq!((field.cols(), field.rows()), (1, 1));

        field.resize(0.0, 0.0);
        assert!(field.cells().is_empty());
        field.update(1.0, 1.0, 1.0);
    }

    #[test]
    fn magnitude_tracks_audio_and_vortex() {
        let mut quiet = field(400.0, 400.0);
        quiet.update(0.0, 0.0, 0.0);
        assert!(quiet.cells().iter().all(|c| (0.5..=1.0).contains(&c.magnitude)));
        let strongest = quiet
            .cells()
            .iter()
            .map(|c| c.magnitude)
            .fold(0.0, f32::max);
        assert!(strongest > 0.9);

        let mut loud = field(400.0, 400.0);
        loud.update(1.0, 0.0, 0.0);
        assert!(loud.cells().iter().all(|c| (2.0..=2.5).contains(&c.magnitude)));
    }

    #[test]
    fn identical_inputs_reproduce_the_field() {
        let mut a = field(320.0, 240.0);
        let mut b = field(320.0, 240.0);
        for _ in 0..3 {
            a.update(0.4, 0.7, 0.2);
            b.update(0.4, 0.7, 0.2);
        }
        assert_eq!(a.cells(), b.cells());
        assert!((a.time() - 0.03).abs() < 1e-6);
    }

    #[test]
    fn mid_energy_moves_the_vortex() {
        let mut calm = field(400.0, 300.0);
        let mut driven = field(400.0, 300.0);
        calm.update(0.0, 0.0, 0.0);
        driven.update(0.0, 0.0, 1.0);

        let centre = Vec2::new(200.0, 150.0);
        let orbit = |p: Vec2| ((p - centre) / Vec2::new(400.0, 300.0)).length();
        assert!((orbit(calm.vortex_center()) - 0.3).abs() < 1e-4);
        assert!(calm.vortex_center().distance(driven.vortex_center()) > 100.0);
    }

    #[test]
    fn cells_near_the_vortex_rotate_around_it() {
        let mut field = field(800.0, 800.0);
        field.update(0.0, 0.0, 0.0);
        let vortex = field.vortex_center();
        let probe = vortex + Vec2::new(30.0, 0.0);
        let vector = field.vector_at(probe.x, probe.y).unwrap();
        assert!(vector.magnitude > 0.9);
    }

    #[test]
    fn lookup_outside_the_grid_is_none() {
        let field = field(100.0, 100.0);
        assert!(field.vector_at(-1.0, 10.0).is_none());
        assert!(field.vector_at(10.0, 120.0).is_none());
        assert!(field.vector_at(99.0, 99.0).is_some());
    }
}
