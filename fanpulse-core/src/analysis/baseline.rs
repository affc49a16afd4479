//! Rolling dB baseline and adaptive thresholds.
//!
//! The estimator keeps a fixed-length circular history of per-tick dB
//! readings and periodically derives robust statistics from it: median,
//! quartiles (median-of-halves convention), and IQR. The state machine's
//! thresholds are `median + iqr + offset`, so they track ambient level
//! automatically — a quiet room and a packed stadium both get sensible
//! trigger points.
//!
//! Recomputation is batched to `recompute_interval_ms` of accumulated tick
//! time rather than running on every sample, keeping per-tick cost flat.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::BaselineConfig;

/// Derived statistics snapshot. `iqr` is already floored, never zero.
#[derive(Debug, Clone, Copy)]
pub struct BaselineSnapshot {
    pub median: f32,
    pub q1: f32,
    pub q3: f32,
    pub iqr: f32,
}

/// State machine trigger levels in dB, derived from the current snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub rising: f32,
    pub loud: f32,
    pub falling: f32,
}

pub struct BaselineEstimator {
    cfg: BaselineConfig,
    history: VecDeque<f32>,
    since_recompute_ms: u64,
    snapshot: BaselineSnapshot,
    /// Reused between recomputes to avoid a per-recompute allocation.
    sort_buf: Vec<f32>,
}

impl BaselineEstimator {
    pub fn new(cfg: BaselineConfig) -> Self {
        let snapshot = fallback_snapshot(&cfg);
        let history_len = cfg.history_len;
        Self {
            cfg,
            history: VecDeque::with_capacity(history_len),
            since_recompute_ms: 0,
            snapshot,
            sort_buf: Vec::with_capacity(history_len),
        }
    }

    /// Append one dB observation and advance the recompute clock by
    /// `tick_ms`. Returns `true` when a recompute ran this tick.
    pub fn observe(&mut self, db: f32, tick_ms: u64) -> bool {
        if self.history.len() == self.cfg.history_len {
            self.history.pop_front();
        }
        self.history.push_back(db);

        self.since_recompute_ms += tick_ms;
        if self.since_recompute_ms < self.cfg.recompute_interval_ms {
            return false;
        }
        self.since_recompute_ms = 0;
        self.recompute();
        true
    }

    pub fn snapshot(&self) -> BaselineSnapshot {
        self.snapshot
    }

    pub fn thresholds(&self) -> Thresholds {
        let base = self.snapshot.median + self.snapshot.iqr;
        Thresholds {
            rising: base + self.cfg.rising_offset_db,
            loud: base + self.cfg.loud_offset_db,
            falling: base + self.cfg.falling_offset_db,
        }
    }

    fn recompute(&mut self) {
        // Quartiles need at least two samples regardless of configuration.
        if self.history.len() < self.cfg.min_history.max(2) {
            // Too little signal seen — keep the conservative fixed baseline.
            self.snapshot = fallback_snapshot(&self.cfg);
            return;
        }

        self.sort_buf.clear();
        self.sort_buf.extend(self.history.iter().copied());
        self.sort_buf.sort_by(f32::total_cmp);

        let (q1, median, q3) = quartiles(&self.sort_buf);
        let iqr = (q3 - q1).max(self.cfg.iqr_floor_db);
        self.snapshot = BaselineSnapshot {
            median,
            q1,
            q3,
            iqr,
        };
        debug!(
            median,
            q1,
            q3,
            iqr,
            samples = self.sort_buf.len(),
            "baseline recomputed"
        );
    }
}

fn fallback_snapshot(cfg: &BaselineConfig) -> BaselineSnapshot {
    BaselineSnapshot {
        median: cfg.fallback_median_db,
        q1: cfg.fallback_median_db - cfg.fallback_iqr_db / 2.0,
        q3: cfg.fallback_median_db + cfg.fallback_iqr_db / 2.0,
        iqr: cfg.fallback_iqr_db,
    }
}

/// Median of an already-sorted slice.
fn median_of(sorted: &[f32]) -> f32 {
    let n = sorted.len();
    debug_assert!(n > 0);
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Quartiles by the median-of-halves (Moore–McCabe) convention: q1/q3 are
/// the medians of the lower/upper halves, excluding the middle element for
/// odd-length input.
fn quartiles(sorted: &[f32]) -> (f32, f32, f32) {
    let n = sorted.len();
    let half = n / 2;
    let q1 = median_of(&sorted[..half]);
    let q3 = median_of(&sorted[n - half..]);
    (q1, median_of(sorted), q3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimator() -> BaselineEstimator {
        BaselineEstimator::new(BaselineConfig::default())
    }

    /// Feed each value and force a recompute on the last one.
    fn feed(est: &mut BaselineEstimator, values: &[f32]) {
        let interval = est.cfg.recompute_interval_ms;
        for (i, &v) in values.iter().enumerate() {
            let tick = if i + 1 == values.len() { interval } else { 0 };
            est.observe(v, tick);
        }
    }

    #[test]
    fn median_of_five_known_values() {
        let mut sorted = vec![-50.0, -48.0, -52.0, -49.0, -51.0];
        sorted.sort_by(f32::total_cmp);
        let (_, median, _) = quartiles(&sorted);
        assert_relative_eq!(median, -50.0);
    }

    #[test]
    fn quartiles_of_eight_known_values() {
        let sorted = vec![-60.0, -55.0, -50.0, -45.0, -40.0, -35.0, -30.0, -25.0];
        let (q1, median, q3) = quartiles(&sorted);
        assert_relative_eq!(q1, -52.5);
        assert_relative_eq!(median, -42.5);
        assert_relative_eq!(q3, -32.5);
        assert_relative_eq!(q3 - q1, 20.0);
    }

    #[test]
    fn sparse_history_keeps_the_fallback_baseline() {
        let mut est = estimator();
        feed(&mut est, &[-30.0, -31.0, -29.0]);
        let snap = est.snapshot();
        assert_relative_eq!(snap.median, est.cfg.fallback_median_db);
        assert_relative_eq!(snap.iqr, est.cfg.fallback_iqr_db);
    }

    #[test]
    fn identical_values_keep_a_nonzero_iqr() {
        let mut est = estimator();
        feed(&mut est, &[-44.0; 30]);
        let snap = est.snapshot();
        assert_relative_eq!(snap.median, -44.0);
        assert_relative_eq!(snap.iqr, est.cfg.iqr_floor_db);
    }

    #[test]
    fn recompute_is_batched_to_the_interval() {
        let mut est = estimator();
        for _ in 0..20 {
            assert!(!est.observe(-40.0, 0));
        }
        // Accumulated tick time crosses the interval exactly once.
        assert!(est.observe(-40.0, est.cfg.recompute_interval_ms));
        assert!(!est.observe(-40.0, 1));
    }

    #[test]
    fn history_is_circular() {
        let mut est = estimator();
        let len = est.cfg.history_len;
        // Fill with loud readings, then overwrite completely with quiet ones.
        feed(&mut est, &vec![-20.0; len]);
        feed(&mut est, &vec![-60.0; len]);
        assert_relative_eq!(est.snapshot().median, -60.0);
        assert_eq!(est.history.len(), len);
    }

    #[test]
    fn thresholds_track_median_plus_iqr_plus_offsets() {
        let mut est = estimator();
        feed(&mut est, &[-60.0, -55.0, -50.0, -45.0, -40.0, -35.0, -30.0, -25.0, -42.0, -43.0]);
        let snap = est.snapshot();
        let th = est.thresholds();
        assert_relative_eq!(th.rising, snap.median + snap.iqr + 5.0);
        assert_relative_eq!(th.loud, snap.median + snap.iqr + 10.0);
        assert_relative_eq!(th.falling, snap.median + snap.iqr + 3.0);
        assert!(th.falling < th.rising && th.rising < th.loud);
    }
}
