//! Tier classification of sustained loud periods.
//!
//! Tiers are bands on `db - median`, each relative to the current IQR, so
//! the same crowd reads the same tier in a quiet gym and a roaring arena.
//! Bands are ordered and non-overlapping: a reading matches exactly one
//! tier or none.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::BaselineSnapshot;
use crate::classify::state::{CrowdState, CrowdStateMachine};
use crate::config::TierConfig;

/// Crowd-noise intensity tier. Ordering is Bronze < Silver < Gold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

pub struct TierClassifier {
    cfg: TierConfig,
}

impl TierClassifier {
    pub fn new(cfg: TierConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate the current tick. Returns a tier only while the machine is
    /// in `Loud` with enough accumulated loud time; a successful
    /// classification consumes that accumulator so one sustained roar is
    /// tiered once.
    pub fn evaluate(
        &self,
        machine: &mut CrowdStateMachine,
        db: f32,
        baseline: &BaselineSnapshot,
    ) -> Option<Tier> {
        if machine.state() != CrowdState::Loud {
            return None;
        }
        if machine.consecutive_loud_ms() < self.cfg.min_loud_ms {
            return None;
        }

        let offset = db - baseline.median;
        let tier = self.tier_for_offset(offset, baseline.iqr)?;

        machine.reset_loud_accumulator();
        info!(
            ?tier,
            db,
            offset,
            iqr = baseline.iqr,
            loud_ms = self.cfg.min_loud_ms,
            "tier classified"
        );
        Some(tier)
    }

    /// Band lookup on the dB offset over median. Checked loudest-first;
    /// the bands cannot overlap because the offsets are validated strictly
    /// increasing.
    fn tier_for_offset(&self, offset: f32, iqr: f32) -> Option<Tier> {
        if offset >= iqr + self.cfg.gold_offset_db {
            Some(Tier::Gold)
        } else if offset >= iqr + self.cfg.silver_offset_db {
            Some(Tier::Silver)
        } else if offset >= iqr + self.cfg.bronze_offset_db {
            Some(Tier::Bronze)
        } else {
            None
        }
    }
}
