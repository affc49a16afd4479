//! Chant pattern detection.
//!
//! Organized chanting concentrates energy in the vocal band and pulses it
//! rhythmically, unlike broadband crowd roar (spread spectrum, slow
//! envelope) or a PA tone (single bin, flat envelope). The detector tracks
//! the per-tick in-band energy ratio as an envelope and requires four
//! criteria to hold simultaneously for a raw detection:
//!
//! 1. energy ratio above `energy_ratio_min`,
//! 2. envelope variance above `variance_min` (rejects constant tones),
//! 3. envelope mean above `mean_floor` (sustained activity),
//! 4. in-band energy spread over at least `min_active_bins` bins with no
//!    single bin holding more than `max_single_bin_fraction` of it.
//!
//! ## Hysteresis
//!
//! Entering chant-active is immediate on a raw detection. Leaving requires
//! `release_ticks` consecutive false raw decisions, so a borderline window
//! cannot flicker the flag off and back on.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::ChantConfig;

/// Guard against division by zero on silent spectra.
const ENERGY_EPSILON: f32 = 1e-12;

/// Result of one detector tick.
#[derive(Debug, Clone, Copy)]
pub struct ChantObservation {
    /// This tick's raw four-criteria decision, before hysteresis.
    pub raw: bool,
    /// The hysteresis-filtered flag consumed downstream.
    pub active: bool,
    /// In-band over total energy for this tick.
    pub band_ratio: f32,
    /// Frequency of the strongest in-band bin, Hz.
    pub peak_hz: f32,
}

pub struct ChantDetector {
    cfg: ChantConfig,
    bin_hz: f32,
    /// Inclusive bin range covering the configured vocal band.
    lo_bin: usize,
    hi_bin: usize,
    envelope: VecDeque<f32>,
    mean: f32,
    variance: f32,
    active: bool,
    non_chant_streak: u32,
}

impl ChantDetector {
    pub fn new(cfg: ChantConfig, sample_rate: u32, fft_size: usize) -> Self {
        let bin_hz = sample_rate as f32 / fft_size as f32;
        // Bin 0 is the DC component; the band never includes it.
        let lo_bin = ((cfg.band_low_hz / bin_hz).ceil() as usize).max(1);
        let hi_bin = ((cfg.band_high_hz / bin_hz).floor() as usize).min(fft_size / 2 - 1);
        let history_len = cfg.history_len;
        Self {
            cfg,
            bin_hz,
            lo_bin,
            hi_bin,
            envelope: VecDeque::with_capacity(history_len),
            mean: 0.0,
            variance: 0.0,
            active: false,
            non_chant_streak: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn envelope_mean(&self) -> f32 {
        self.mean
    }

    pub fn envelope_variance(&self) -> f32 {
        self.variance
    }

    /// Feed one magnitude spectrum and update the chant decision.
    pub fn observe(&mut self, magnitudes: &[f32]) -> ChantObservation {
        let hi = self.hi_bin.min(magnitudes.len().saturating_sub(1));
        let (band_energy, peak_bin) = self.band_energy(magnitudes, hi);
        let total_energy: f32 = magnitudes
            .iter()
            .skip(1)
            .map(|&m| m * m)
            .sum::<f32>()
            .max(ENERGY_EPSILON);
        let ratio = band_energy / total_energy;

        if self.envelope.len() == self.cfg.history_len {
            self.envelope.pop_front();
        }
        self.envelope.push_back(ratio);
        self.update_envelope_stats();

        let spread_ok = self.spread_criterion(magnitudes, hi, band_energy);
        let raw = ratio >= self.cfg.energy_ratio_min
            && self.variance >= self.cfg.variance_min
            && self.mean >= self.cfg.mean_floor
            && spread_ok;

        if raw {
            if !self.active {
                debug!(
                    ratio,
                    mean = self.mean,
                    variance = self.variance,
                    "chant detected"
                );
            }
            self.active = true;
            self.non_chant_streak = 0;
        } else if self.active {
            self.non_chant_streak += 1;
            if self.non_chant_streak >= self.cfg.release_ticks {
                debug!(streak = self.non_chant_streak, "chant released");
                self.active = false;
                self.non_chant_streak = 0;
            }
        }

        ChantObservation {
            raw,
            active: self.active,
            band_ratio: ratio,
            peak_hz: peak_bin as f32 * self.bin_hz,
        }
    }

    /// Sum of squared magnitudes across the vocal band, plus the strongest
    /// bin index.
    fn band_energy(&self, magnitudes: &[f32], hi: usize) -> (f32, usize) {
        let mut energy = 0.0;
        let mut peak_bin = self.lo_bin;
        let mut peak = 0.0;
        for bin in self.lo_bin..=hi {
            let e = magnitudes[bin] * magnitudes[bin];
            energy += e;
            if e > peak {
                peak = e;
                peak_bin = bin;
            }
        }
        (energy, peak_bin)
    }

    fn spread_criterion(&self, magnitudes: &[f32], hi: usize, band_energy: f32) -> bool {
        if band_energy <= ENERGY_EPSILON {
            return false;
        }
        let active_floor = band_energy * self.cfg.active_bin_fraction;
        let single_cap = band_energy * self.cfg.max_single_bin_fraction;
        let mut active_bins = 0;
        for bin in self.lo_bin..=hi {
            let e = magnitudes[bin] * magnitudes[bin];
            if e > single_cap {
                return false;
            }
            if e >= active_floor {
                active_bins += 1;
            }
        }
        active_bins >= self.cfg.min_active_bins
    }

    fn update_envelope_stats(&mut self) {
        let n = self.envelope.len() as f32;
        self.mean = self.envelope.iter().sum::<f32>() / n;
        self.variance = self
            .envelope
            .iter()
            .map(|&r| {
                let d = r - self.mean;
                d * d
            })
            .sum::<f32>()
            / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 16_000;
    const FFT_SIZE: usize = 512;
    const BINS: usize = FFT_SIZE / 2;

    fn detector() -> ChantDetector {
        ChantDetector::new(ChantConfig::default(), SAMPLE_RATE, FFT_SIZE)
    }

    /// Spectrum with the given magnitude spread over several vocal-band
    /// bins, on top of a uniform noise floor.
    fn vocal_spectrum(band_level: f32, floor: f32) -> Vec<f32> {
        let mut mags = vec![floor; BINS];
        // 31.25 Hz per bin: bins 8..=12 sit around 250–375 Hz.
        for bin in 8..=12 {
            mags[bin] = band_level;
        }
        mags
    }

    /// All energy in one bin — a PA test tone, not a chant.
    fn single_tone_spectrum(level: f32) -> Vec<f32> {
        let mut mags = vec![0.001; BINS];
        mags[10] = level;
        mags
    }

    /// Drive the detector with alternating strong/weak vocal windows, which
    /// satisfies the ratio, mean, variance, and spread criteria together.
    fn drive_to_active(det: &mut ChantDetector) {
        for i in 0..12 {
            let level = if i % 2 == 0 { 3.0 } else { 0.8 };
            det.observe(&vocal_spectrum(level, 0.05));
        }
        assert!(det.is_active(), "pulsing vocal energy should read as chant");
    }

    #[test]
    fn pulsing_vocal_band_activates() {
        let mut det = detector();
        drive_to_active(&mut det);
    }

    #[test]
    fn constant_tone_never_activates() {
        let mut det = detector();
        for _ in 0..30 {
            let obs = det.observe(&vocal_spectrum(3.0, 0.05));
            // Ratio and mean pass, but a flat envelope has no variance.
            assert!(!obs.raw);
        }
        assert!(!det.is_active());
    }

    #[test]
    fn single_bin_concentration_never_activates() {
        let mut det = detector();
        for i in 0..30 {
            let level = if i % 2 == 0 { 5.0 } else { 1.0 };
            let obs = det.observe(&single_tone_spectrum(level));
            assert!(!obs.raw, "one dominant bin must fail the spread check");
        }
        assert!(!det.is_active());
    }

    #[test]
    fn broadband_noise_never_activates() {
        let mut det = detector();
        for i in 0..30 {
            let level = if i % 2 == 0 { 0.5 } else { 0.3 };
            let obs = det.observe(&vec![level; BINS]);
            // Vocal band is a small slice of the full spectrum.
            assert!(obs.band_ratio < 0.4);
            assert!(!obs.raw);
        }
    }

    #[test]
    fn one_false_tick_does_not_clear_the_flag() {
        let mut det = detector();
        drive_to_active(&mut det);

        let obs = det.observe(&vec![0.01; BINS]);
        assert!(!obs.raw);
        assert!(obs.active, "hysteresis must hold across one false tick");
    }

    #[test]
    fn release_requires_the_configured_streak() {
        let mut det = detector();
        drive_to_active(&mut det);

        let release = det.cfg.release_ticks;
        for i in 0..release {
            let obs = det.observe(&vec![0.01; BINS]);
            let expect_active = i + 1 < release;
            assert_eq!(obs.active, expect_active, "tick {i}");
        }
        assert!(!det.is_active());
    }

    #[test]
    fn reentry_after_release_is_immediate() {
        let mut det = detector();
        drive_to_active(&mut det);
        for _ in 0..det.cfg.release_ticks {
            det.observe(&vec![0.01; BINS]);
        }
        assert!(!det.is_active());

        // Envelope history still holds the pulsing pattern; one strong
        // window re-arms the flag without a warm-up period.
        let obs = det.observe(&vocal_spectrum(3.0, 0.05));
        assert!(obs.raw);
        assert!(obs.active);
    }

    #[test]
    fn peak_frequency_tracks_the_strongest_band_bin() {
        let mut det = detector();
        let mut mags = vocal_spectrum(1.0, 0.01);
        mags[10] = 2.0; // 312.5 Hz
        let obs = det.observe(&mags);
        assert!((obs.peak_hz - 312.5).abs() < 1e-3);
    }
}
