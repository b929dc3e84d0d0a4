use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{graph::AnalyserOptions, Result, VisualiserError};

pub const BASS_BAND: (f32, f32) = (0.0, 0.1);
pub const MID_BAND: (f32, f32) = (0.2, 0.5);
pub const TREBLE_BAND: (f32, f32) = (0.6, 1.0);

/// Normalised loudness metrics extracted from one frame of byte spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetrics {
    /// Mean of the whole spectrum, in [0, 1].
    pub intensity: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl AudioMetrics {
    /// Derives the per-frame metrics from analyser bytes. `buffer_length` is
    /// the number of meaningful bins; band boundaries are fractions of it.
    pub fn from_frequency_bytes(bytes: &[u8], buffer_length: usize) -> Self {
        let len = buffer_length.min(bytes.len());
        Self {
            intensity: mean_intensity(&bytes[..len]),
            bass: band_intensity(bytes, buffer_length, BASS_BAND),
            mid: band_intensity(bytes, buffer_length, MID_BAND),
            treble: band_intensity(bytes, buffer_length, TREBLE_BAND),
        }
    }
}

/// Mean byte value over the `[lo, hi)` fraction of `buffer_length`, scaled to
/// [0, 1]. Indices past the end of `bytes` are ignored.
pub fn band_intensity(bytes: &[u8], buffer_length: usize, (lo, hi): (f32, f32)) -> f32 {
    let start = ((buffer_length as f32 * lo).floor() as usize).min(bytes.len());
    let end = ((buffer_length as f32 * hi).floor() as usize).min(bytes.len());
    if end <= start {
        return 0.0;
    }
    mean_intensity(&bytes[start..end])
}

fn mean_intensity(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (sum as f32 / bytes.len() as f32 / 255.0).min(1.0)
}

/// Windowed FFT analyser producing the byte spectra exposed by analyser
/// nodes: Blackman window, magnitude normalised by the block size, temporal
/// smoothing between reads and a linear decibel-to-byte mapping.
pub struct SpectrumAnalyser {
    options: AnalyserOptions,
    history: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    window: Vec<f32>,
    fft: FftResources,
}

impl SpectrumAnalyser {
    pub fn new(options: AnalyserOptions) -> Result<Self> {
        options.validate()?;
        let size = options.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            history: vec![0.0; size],
            write_pos: 0,
            smoothed: vec![0.0; options.frequency_bin_count()],
            window: (0..size).map(|i| blackman_value(i, size)).collect(),
            options,
            fft,
        })
    }

    pub fn options(&self) -> &AnalyserOptions {
        &self.options
    }

    /// Appends samples to the analysis window, keeping the most recent
    /// `fft_size` of them.
    pub fn push(&mut self, samples: &[f32]) {
        let size = self.history.len();
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    /// Fills `out` with the byte frequency spectrum. Smoothing state advances
    /// on every call.
    pub fn frequency_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let size = self.history.len();
        for i in 0..size {
            let sample = self.history[(self.write_pos + i) % size];
            self.fft.input[i] = sample * self.window[i];
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| VisualiserError::msg(format!("fft failed: {err}")))?;

        let tau = self.options.smoothing_time_constant;
        let min_db = self.options.min_decibels;
        let range = self.options.max_decibels - min_db;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.fft.spectrum[k].norm() / size as f32;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
        }

        for (byte, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            *byte = if magnitude <= f32::MIN_POSITIVE {
                0
            } else {
                let db = 20.0 * magnitude.log10();
                (255.0 * (db - min_db) / range).clamp(0.0, 255.0) as u8
            };
        }
        Ok(())
    }

    /// Fills `out` with the most recent waveform, 128 being silence.
    pub fn time_domain_bytes(&self, out: &mut [u8]) {
        let size = self.history.len();
        let skip = size.saturating_sub(out.len());
        for (i, byte) in out.iter_mut().enumerate().take(size) {
            let sample = self.history[(self.write_pos + skip + i) % size];
            *byte = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("options", &self.options)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    let phase = 2.0 * PI * index as f32 / len as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}
