//! Windowed spectral analysis.
//!
//! Each processing tick hands the analyzer the most recent window of
//! samples. The analyzer computes:
//!
//! 1. RMS over the full window, converted to dBFS (reference 1.0, epsilon
//!    guard against silent windows).
//! 2. A Hann-windowed forward FFT over the most recent `fft_size` samples,
//!    yielding `fft_size / 2` magnitude bins at `sample_rate / fft_size` Hz
//!    per bin.
//!
//! The FFT plan and the Hann table are built once at construction; `analyze`
//! reuses a scratch buffer and performs no allocation besides the returned
//! magnitude vector.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Guard against `log10(0)` on all-zero windows.
const RMS_EPSILON: f32 = 1e-10;

/// One tick's worth of analysis output, consumed by every later stage.
#[derive(Debug, Clone)]
pub struct WindowMeasurement {
    /// Level of the full window in dBFS (negative for any real signal).
    pub db: f32,
    /// Root-mean-square of the full window, in [0, 1].
    pub rms: f32,
    /// Magnitude per FFT bin, `fft_size / 2` entries.
    pub magnitudes: Vec<f32>,
}

pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    fft_size: usize,
    sample_rate: u32,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        // Raised-cosine (Hann) window, precomputed once.
        let hann = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            hann,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            fft_size,
            sample_rate,
        }
    }

    /// Frequency resolution of one bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Analyze one window. `samples` must hold at least `fft_size` entries;
    /// the FFT consumes the most recent sub-window, the RMS the whole slice.
    pub fn analyze(&mut self, samples: &[f32]) -> WindowMeasurement {
        debug_assert!(samples.len() >= self.fft_size);

        let rms = rms(samples);
        let db = 20.0 * rms.max(RMS_EPSILON).log10();

        let sub = &samples[samples.len() - self.fft_size..];
        for (slot, (&sample, &w)) in self.scratch.iter_mut().zip(sub.iter().zip(&self.hann)) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        // Real input: keep the positive-frequency half only.
        let magnitudes = self.scratch[..self.fft_size / 2]
            .iter()
            .map(|c| c.norm())
            .collect();

        WindowMeasurement {
            db,
            rms,
            magnitudes,
        }
    }
}

/// Root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
