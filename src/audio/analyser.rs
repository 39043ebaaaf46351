//! Frequency-domain level meter for the visualizer.
//!
//! Follows the browser analyser-node model: Blackman window, FFT magnitudes
//! smoothed over time, converted to decibels and mapped onto a byte range.

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

pub const FFT_SIZE: usize = 32;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

pub struct Analyser {
    window: [f32; FFT_SIZE],
    smoothed: [f32; BIN_COUNT],
    fft: Arc<dyn RealToComplex<f32>>,
    windowed: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new() -> Self {
        let mut window = [0.0; FFT_SIZE];
        let alpha = 0.16;
        let a0 = 0.5 * (1.0 - alpha);
        let a1 = 0.5;
        let a2 = 0.5 * alpha;
        for (n, w) in window.iter_mut().enumerate() {
            let x = n as f32 / FFT_SIZE as f32;
            *w = a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos();
        }

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);
        let windowed = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();

        Self {
            window,
            smoothed: [0.0; BIN_COUNT],
            fft,
            windowed,
            spectrum,
            scratch,
        }
    }

    /// Byte magnitudes (0..=255) of the latest `FFT_SIZE` samples
    pub fn byte_frequency_data(&mut self, samples: &[f32; FFT_SIZE]) -> [u8; BIN_COUNT] {
        for ((out, &x), &w) in self.windowed.iter_mut().zip(samples).zip(&self.window) {
            *out = x * w;
        }

        // The planned length always matches the buffers; zeros on the off chance
        if self
            .fft
            .process_with_scratch(&mut self.windowed, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            self.spectrum.fill(Complex::new(0.0, 0.0));
        }

        let mut bytes = [0u8; BIN_COUNT];
        for (k, out) in bytes.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() / FFT_SIZE as f32;

            let smoothed = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * self.smoothed[k].max(f32::MIN_POSITIVE).log10();
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            *out = scaled.clamp(0.0, 255.0) as u8;
        }

        bytes
    }

    /// Mean of the byte bins: the visualizer volume
    pub fn level(&mut self, samples: &[f32; FFT_SIZE]) -> f32 {
        let bins = self.byte_frequency_data(samples);
        bins.iter().map(|&b| b as f32).sum::<f32>() / BIN_COUNT as f32
    }

    pub fn reset(&mut self) {
        self.smoothed = [0.0; BIN_COUNT];
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}
