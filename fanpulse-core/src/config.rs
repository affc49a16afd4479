//! Engine configuration.
//!
//! Every tunable the pipeline recognizes lives here, grouped by stage. All
//! values are static for the lifetime of the engine: `EngineConfig::validate`
//! runs once in `FanPulseEngine::new` and rejects structurally invalid
//! configurations before any thread is spawned. There is no hot-reload.

use serde::{Deserialize, Serialize};

use crate::error::{FanPulseError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Input sample rate in Hz. The ingestion boundary delivers mono PCM at
    /// this rate; no resampling is performed. Default: 16000.
    pub sample_rate_hz: u32,
    /// Processing tick period in milliseconds. Default: 500.
    pub tick_period_ms: u64,
    /// Samples copied out of the ring per tick for RMS/dB computation.
    /// Default: 8000 (500 ms at 16 kHz).
    pub window_samples: usize,
    /// FFT size applied to the most recent sub-window. Must be a power of
    /// two and no larger than `window_samples`. Default: 512.
    pub fft_size: usize,
    pub ring: RingConfig,
    pub baseline: BaselineConfig,
    pub chant: ChantConfig,
    pub state: StateMachineConfig,
    pub tier: TierConfig,
    pub batch: BatchConfig,
}

/// Ring buffer and frame ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RingConfig {
    /// Fixed sample capacity, allocated once at start. Default: 262144
    /// (~16 s at 16 kHz).
    pub capacity_samples: usize,
    /// Occupancy fraction above which the overflow valve opens. Default: 0.8.
    pub high_water: f32,
    /// Fraction of capacity discarded (oldest first) when the valve opens.
    /// Default: 0.2.
    pub drop_fraction: f32,
    /// Largest accepted frame payload, in samples. Default: 2048.
    pub max_frame_samples: usize,
    /// Bounded wait for the consumer-side lock. A tick that cannot acquire
    /// the ring within this window is skipped, never queued. Default: 10.
    pub lock_wait_ms: u64,
}

/// Rolling dB baseline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BaselineConfig {
    /// Circular dB history length. Default: 120 (60 s at 500 ms ticks).
    pub history_len: usize,
    /// How often the median/quartiles are recomputed, in accumulated tick
    /// milliseconds. Default: 2000.
    pub recompute_interval_ms: u64,
    /// Below this many observed samples the fixed fallback baseline is used.
    /// Default: 10.
    pub min_history: usize,
    /// Fallback median until enough history accumulates. Default: -55 dBFS.
    pub fallback_median_db: f32,
    /// Fallback IQR paired with the fallback median. Default: 6.
    pub fallback_iqr_db: f32,
    /// Lower bound on the computed IQR, so all-identical histories never
    /// collapse the threshold band to zero width. Default: 2.
    pub iqr_floor_db: f32,
    /// Threshold offsets over `median + iqr`, independently tunable.
    pub rising_offset_db: f32,
    pub loud_offset_db: f32,
    pub falling_offset_db: f32,
}

/// Chant pattern detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChantConfig {
    /// Vocal band lower bound in Hz. Default: 20.
    pub band_low_hz: f32,
    /// Vocal band upper bound in Hz. Must stay below Nyquist. Default: 1500.
    pub band_high_hz: f32,
    /// Envelope (band-energy ratio) history length. Default: 20
    /// (10 s at 500 ms ticks).
    pub history_len: usize,
    /// Minimum in-band / total energy ratio for a raw detection. Default: 0.4.
    pub energy_ratio_min: f32,
    /// Minimum envelope variance — rules out constant tones. Default: 5e-4.
    pub variance_min: f32,
    /// Minimum envelope mean — a sustained-activity floor. Default: 0.3.
    pub mean_floor: f32,
    /// Spread criterion: at least this many in-band bins must each carry
    /// `active_bin_fraction` of in-band energy. Default: 3.
    pub min_active_bins: usize,
    /// Fraction of in-band energy that marks a bin as active. Default: 0.05.
    pub active_bin_fraction: f32,
    /// No single bin may exceed this fraction of in-band energy — rules out
    /// single-tone false positives. Default: 0.6.
    pub max_single_bin_fraction: f32,
    /// Consecutive false raw decisions required to clear an active chant
    /// flag. Default: 3 (~1.5 s at 500 ms ticks).
    pub release_ticks: u32,
}

/// Crowd state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateMachineConfig {
    /// Minimum dwell in Rising before a drop below the falling threshold may
    /// abort the build-up. Default: 1000.
    pub rising_dwell_min_ms: u64,
    /// Quiet time in Falling before returning to Idle. Default: 2000.
    pub falling_idle_timeout_ms: u64,
}

/// Tier classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TierConfig {
    /// Tier bands on `db - median`, each relative to the current IQR.
    /// Must be strictly increasing bronze < silver < gold. Defaults: 5/10/15.
    pub bronze_offset_db: f32,
    pub silver_offset_db: f32,
    pub gold_offset_db: f32,
    /// Minimum accumulated Loud-state time before any tier is assigned.
    /// Default: 4000.
    pub min_loud_ms: u64,
}

/// Batch aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    /// Batch window length in accumulated tick milliseconds. Default: 10000.
    pub window_ms: u64,
    /// Peak must clear `median + emit_margin_db` for the window to emit.
    /// Default: 5.
    pub emit_margin_db: f32,
    /// Cumulative Loud time in the window that qualifies an untiered,
    /// chantless window for emission. Default: 2000.
    pub min_loud_in_window_ms: u64,
    /// Circular buffer length for in-window dB observations. Default: 32.
    pub db_history_len: usize,
    /// Normalization span for the emitted signal-quality score. Default: 20.
    pub quality_span_db: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            tick_period_ms: 500,
            window_samples: 8_000,
            fft_size: 512,
            ring: RingConfig::default(),
            baseline: BaselineConfig::default(),
            chant: ChantConfig::default(),
            state: StateMachineConfig::default(),
            tier: TierConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity_samples: 1 << 18,
            high_water: 0.8,
            drop_fraction: 0.2,
            max_frame_samples: 2_048,
            lock_wait_ms: 10,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            history_len: 120,
            recompute_interval_ms: 2_000,
            min_history: 10,
            fallback_median_db: -55.0,
            fallback_iqr_db: 6.0,
            iqr_floor_db: 2.0,
            rising_offset_db: 5.0,
            loud_offset_db: 10.0,
            falling_offset_db: 3.0,
        }
    }
}

impl Default for ChantConfig {
    fn default() -> Self {
        Self {
            band_low_hz: 20.0,
            band_high_hz: 1_500.0,
            history_len: 20,
            energy_ratio_min: 0.4,
            variance_min: 5e-4,
            mean_floor: 0.3,
            min_active_bins: 3,
            active_bin_fraction: 0.05,
            max_single_bin_fraction: 0.6,
            release_ticks: 3,
        }
    }
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            rising_dwell_min_ms: 1_000,
            falling_idle_timeout_ms: 2_000,
        }
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            bronze_offset_db: 5.0,
            silver_offset_db: 10.0,
            gold_offset_db: 15.0,
            min_loud_ms: 4_000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            emit_margin_db: 5.0,
            min_loud_in_window_ms: 2_000,
            db_history_len: 32,
            quality_span_db: 20.0,
        }
    }
}

impl EngineConfig {
    /// Reject structurally invalid configurations before the pipeline starts.
    ///
    /// # Errors
    /// `FanPulseError::InvalidConfig` naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(FanPulseError::invalid_config("sample_rate_hz must be > 0"));
        }
        if self.tick_period_ms == 0 {
            return Err(FanPulseError::invalid_config("tick_period_ms must be > 0"));
        }
        if self.window_samples == 0 {
            return Err(FanPulseError::invalid_config("window_samples must be > 0"));
        }
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(FanPulseError::invalid_config(
                "fft_size must be a power of two >= 2",
            ));
        }
        if self.fft_size > self.window_samples {
            return Err(FanPulseError::invalid_config(
                "fft_size must not exceed window_samples",
            ));
        }

        let ring = &self.ring;
        if ring.capacity_samples == 0 {
            return Err(FanPulseError::invalid_config(
                "ring.capacity_samples must be > 0",
            ));
        }
        if !(0.0..1.0).contains(&ring.high_water) || ring.high_water == 0.0 {
            return Err(FanPulseError::invalid_config(
                "ring.high_water must be in (0, 1)",
            ));
        }
        if !(0.0..1.0).contains(&ring.drop_fraction) || ring.drop_fraction == 0.0 {
            return Err(FanPulseError::invalid_config(
                "ring.drop_fraction must be in (0, 1)",
            ));
        }
        if ring.max_frame_samples == 0 || ring.max_frame_samples > ring.capacity_samples {
            return Err(FanPulseError::invalid_config(
                "ring.max_frame_samples must be in 1..=ring.capacity_samples",
            ));
        }
        if self.window_samples > ring.capacity_samples {
            return Err(FanPulseError::invalid_config(
                "window_samples must not exceed ring.capacity_samples",
            ));
        }

        let baseline = &self.baseline;
        if baseline.history_len == 0 {
            return Err(FanPulseError::invalid_config(
                "baseline.history_len must be > 0",
            ));
        }
        if baseline.recompute_interval_ms == 0 {
            return Err(FanPulseError::invalid_config(
                "baseline.recompute_interval_ms must be > 0",
            ));
        }
        if baseline.iqr_floor_db <= 0.0 || baseline.fallback_iqr_db <= 0.0 {
            return Err(FanPulseError::invalid_config(
                "baseline IQR floor and fallback must be > 0",
            ));
        }

        let chant = &self.chant;
        let nyquist = self.sample_rate_hz as f32 / 2.0;
        if chant.band_low_hz < 0.0 || chant.band_low_hz >= chant.band_high_hz {
            return Err(FanPulseError::invalid_config(
                "chant band bounds must satisfy 0 <= low < high",
            ));
        }
        if chant.band_high_hz > nyquist {
            return Err(FanPulseError::invalid_config(
                "chant.band_high_hz must not exceed the Nyquist frequency",
            ));
        }
        if chant.history_len == 0 {
            return Err(FanPulseError::invalid_config(
                "chant.history_len must be > 0",
            ));
        }
        if chant.min_active_bins == 0 {
            return Err(FanPulseError::invalid_config(
                "chant.min_active_bins must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&chant.max_single_bin_fraction) {
            return Err(FanPulseError::invalid_config(
                "chant.max_single_bin_fraction must be in [0, 1]",
            ));
        }

        let tier = &self.tier;
        if !(tier.bronze_offset_db < tier.silver_offset_db
            && tier.silver_offset_db < tier.gold_offset_db)
        {
            return Err(FanPulseError::invalid_config(
                "tier offsets must be strictly increasing bronze < silver < gold",
            ));
        }

        let batch = &self.batch;
        if batch.window_ms == 0 {
            return Err(FanPulseError::invalid_config("batch.window_ms must be > 0"));
        }
        if batch.db_history_len == 0 {
            return Err(FanPulseError::invalid_config(
                "batch.db_history_len must be > 0",
            ));
        }
        if batch.quality_span_db <= 0.0 {
            return Err(FanPulseError::invalid_config(
                "batch.quality_span_db must be > 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.ring.capacity_samples = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_chant_band_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.chant.band_low_hz = 2_000.0;
        cfg.chant.band_high_hz = 100.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chant_band_above_nyquist_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.chant.band_high_hz = 9_000.0; // Nyquist is 8 kHz at 16 kHz input
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_power_of_two_fft_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.fft_size = 500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_monotonic_tier_offsets_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.tier.silver_offset_db = cfg.tier.gold_offset_db;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn window_larger_than_ring_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.ring.capacity_samples = 4_096;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize config");
        let back: EngineConfig = serde_json::from_str(&json).expect("deserialize config");
        assert_eq!(back.sample_rate_hz, cfg.sample_rate_hz);
        assert_eq!(back.tier.min_loud_ms, cfg.tier.min_loud_ms);
        assert_eq!(back.ring.capacity_samples, cfg.ring.capacity_samples);
    }
}
