//! Batch aggregation: many per-tick signals in, at most one event out.
//!
//! The aggregator accumulates tick observations over a fixed window. At the
//! window boundary it decides whether anything in the window deserves the
//! downstream consumer's attention:
//!
//! - at least one candidate observation (a tier, an active chant, or
//!   Loud-state time), and
//! - a peak that cleared `median + emit_margin_db`, and
//! - a tier, a chant, or enough cumulative Loud time.
//!
//! Suppressed windows reset exactly like emitted ones — no carry-over, so
//! memory and output rate stay bounded regardless of input.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::analysis::{BaselineSnapshot, Thresholds};
use crate::classify::Tier;
use crate::config::BatchConfig;
use crate::events::ClassifiedEvent;

/// Everything the aggregator needs from one processing tick.
#[derive(Debug, Clone, Copy)]
pub struct TickSignal {
    pub db: f32,
    pub tier: Option<Tier>,
    pub chant_active: bool,
    pub in_loud: bool,
    /// Dominant vocal-band frequency this tick, Hz.
    pub peak_hz: f32,
}

/// What happened to the window on this tick.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Window still accumulating.
    Open,
    /// Window closed and produced an event.
    Emitted(Box<ClassifiedEvent>),
    /// Window closed below the significance gate.
    Suppressed,
}

pub struct BatchAggregator {
    cfg: BatchConfig,
    elapsed_ms: u64,
    db_history: VecDeque<f32>,
    peak_db: f32,
    /// Logical time of the peak, ms since pipeline start.
    peak_at_ms: u64,
    peak_hz: f32,
    best_tier: Option<Tier>,
    chant_seen: bool,
    loud_ms: u64,
    /// Loud-state or chanting time — becomes the event duration.
    activity_ms: u64,
    candidates: u32,
}

impl BatchAggregator {
    pub fn new(cfg: BatchConfig) -> Self {
        let history_len = cfg.db_history_len;
        Self {
            cfg,
            elapsed_ms: 0,
            db_history: VecDeque::with_capacity(history_len),
            peak_db: f32::NEG_INFINITY,
            peak_at_ms: 0,
            peak_hz: 0.0,
            best_tier: None,
            chant_seen: false,
            loud_ms: 0,
            activity_ms: 0,
            candidates: 0,
        }
    }

    /// Fold one tick into the window; closes it when the window length is
    /// reached.
    pub fn on_tick(
        &mut self,
        signal: TickSignal,
        tick_ms: u64,
        now_ms: u64,
        baseline: &BaselineSnapshot,
        thresholds: &Thresholds,
    ) -> BatchOutcome {
        if self.db_history.len() == self.cfg.db_history_len {
            self.db_history.pop_front();
        }
        self.db_history.push_back(signal.db);

        if signal.db > self.peak_db {
            self.peak_db = signal.db;
            self.peak_at_ms = now_ms;
            self.peak_hz = signal.peak_hz;
        }
        if signal.tier > self.best_tier {
            self.best_tier = signal.tier;
        }
        self.chant_seen |= signal.chant_active;
        if signal.in_loud {
            self.loud_ms += tick_ms;
        }
        if signal.in_loud || signal.chant_active {
            self.activity_ms += tick_ms;
        }
        if signal.tier.is_some() || signal.chant_active || signal.in_loud {
            self.candidates += 1;
        }

        self.elapsed_ms += tick_ms;
        if self.elapsed_ms < self.cfg.window_ms {
            return BatchOutcome::Open;
        }
        self.close(baseline, thresholds)
    }

    fn close(&mut self, baseline: &BaselineSnapshot, thresholds: &Thresholds) -> BatchOutcome {
        let peak_ok = self.peak_db > baseline.median + self.cfg.emit_margin_db;
        let significant = self.best_tier.is_some()
            || self.chant_seen
            || self.loud_ms > self.cfg.min_loud_in_window_ms;

        let outcome = if self.candidates > 0 && peak_ok && significant {
            let event = self.build_event(baseline, thresholds);
            info!(
                tier = ?event.tier,
                peak_db = event.peak_db,
                duration_ms = event.duration_ms,
                chant = event.chant_detected,
                confidence = event.detection_confidence,
                "batch emitted"
            );
            BatchOutcome::Emitted(Box::new(event))
        } else {
            debug!(
                candidates = self.candidates,
                peak_db = self.peak_db,
                loud_ms = self.loud_ms,
                chant = self.chant_seen,
                "batch suppressed"
            );
            BatchOutcome::Suppressed
        };

        self.reset();
        outcome
    }

    fn build_event(&self, baseline: &BaselineSnapshot, thresholds: &Thresholds) -> ClassifiedEvent {
        let window_mean = self.db_history.iter().sum::<f32>() / self.db_history.len() as f32;
        let signal_quality =
            ((self.peak_db - window_mean) / self.cfg.quality_span_db).clamp(0.0, 1.0);

        let mut confidence: f32 = 0.0;
        confidence += match self.best_tier {
            Some(Tier::Gold) => 0.5,
            Some(Tier::Silver) => 0.45,
            Some(Tier::Bronze) => 0.4,
            None => 0.0,
        };
        if self.chant_seen {
            confidence += 0.3;
        }
        if self.loud_ms > self.cfg.min_loud_in_window_ms {
            confidence += 0.2;
        }

        ClassifiedEvent {
            tier: self.best_tier,
            peak_db: self.peak_db,
            duration_ms: self.activity_ms.min(u64::from(u32::MAX)) as u32,
            // Logical time; the pipeline shifts it onto the wall clock.
            timestamp_ms: self.peak_at_ms,
            chant_detected: self.chant_seen,
            baseline_db: baseline.median,
            dynamic_threshold: thresholds.loud,
            threshold_offset_db: self.peak_db - thresholds.loud,
            environment_iqr: baseline.iqr,
            signal_quality,
            detection_confidence: confidence.clamp(0.0, 1.0),
            frequency_peak: Some(self.peak_hz),
            background_noise: Some(baseline.median),
        }
    }

    fn reset(&mut self) {
        self.elapsed_ms = 0;
        self.db_history.clear();
        self.peak_db = f32::NEG_INFINITY;
        self.peak_at_ms = 0;
        self.peak_hz = 0.0;
        self.best_tier = None;
        self.chant_seen = false;
        self.loud_ms = 0;
        self.activity_ms = 0;
        self.candidates = 0;
    }
}
