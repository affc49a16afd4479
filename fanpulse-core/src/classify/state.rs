//! Crowd loudness state machine.
//!
//! ```text
//!          rising                loud
//! Idle ──────────► Rising ──────────────► Loud
//!  ▲                  │  ▲                  │
//!  │   quiet timeout  │  │ rising           │ below falling
//!  └────── Falling ◄──┘  └────── Falling ◄──┘
//!          (dwell guard)
//! ```
//!
//! Transitions are evaluated once per processing tick against the
//! baseline-derived thresholds. All timing is expressed as millisecond
//! accumulators advanced by the fixed tick period — no wall-clock reads —
//! so any input sequence drives the machine deterministically.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::Thresholds;
use crate::config::StateMachineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdState {
    /// Ambient noise near baseline.
    Idle,
    /// Level has crossed the rising threshold; an event may be building.
    Rising,
    /// Level above the loud threshold; tier classification is armed.
    Loud,
    /// Level dropped below the falling threshold; waiting out the decay.
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CrowdState,
    pub to: CrowdState,
}

pub struct CrowdStateMachine {
    cfg: StateMachineConfig,
    state: CrowdState,
    /// Time spent in the current state.
    ms_in_state: u64,
    /// Highest dB seen since entering the current build-up (reset on
    /// Idle→Rising, preserved across Rising/Loud/Falling re-entry).
    peak_db: f32,
    consecutive_loud_ms: u64,
    consecutive_quiet_ms: u64,
}

impl CrowdStateMachine {
    pub fn new(cfg: StateMachineConfig) -> Self {
        Self {
            cfg,
            state: CrowdState::Idle,
            ms_in_state: 0,
            peak_db: f32::NEG_INFINITY,
            consecutive_loud_ms: 0,
            consecutive_quiet_ms: 0,
        }
    }

    pub fn state(&self) -> CrowdState {
        self.state
    }

    pub fn peak_db(&self) -> f32 {
        self.peak_db
    }

    pub fn consecutive_loud_ms(&self) -> u64 {
        self.consecutive_loud_ms
    }

    /// Called by the tier classifier after a successful classification so
    /// the same sustained loud period is not tiered twice.
    pub fn reset_loud_accumulator(&mut self) {
        self.consecutive_loud_ms = 0;
    }

    /// Advance one tick: accumulate time in the current state, then apply
    /// at most one transition for this tick's dB reading.
    pub fn advance(
        &mut self,
        db: f32,
        thresholds: &Thresholds,
        tick_ms: u64,
    ) -> Option<StateTransition> {
        self.ms_in_state += tick_ms;
        if db > self.peak_db {
            self.peak_db = db;
        }

        let from = self.state;
        let to = match self.state {
            CrowdState::Idle => {
                if db > thresholds.rising {
                    // Fresh build-up: previous event's tracking is stale.
                    self.peak_db = db;
                    self.consecutive_loud_ms = 0;
                    self.consecutive_quiet_ms = 0;
                    Some(CrowdState::Rising)
                } else {
                    None
                }
            }

            CrowdState::Rising => {
                if db > thresholds.loud {
                    // Carry the build-up time into the loud accumulator.
                    self.consecutive_loud_ms += self.ms_in_state;
                    Some(CrowdState::Loud)
                } else if db < thresholds.falling
                    && self.ms_in_state >= self.cfg.rising_dwell_min_ms
                {
                    // Dwell guard: a single noisy dip cannot abort a
                    // build-up that only just started.
                    Some(CrowdState::Falling)
                } else {
                    None
                }
            }

            CrowdState::Loud => {
                self.consecutive_loud_ms += tick_ms;
                if db < thresholds.falling {
                    // Loud time is preserved for downstream classification.
                    Some(CrowdState::Falling)
                } else {
                    None
                }
            }

            CrowdState::Falling => {
                self.consecutive_quiet_ms += tick_ms;
                if db > thresholds.rising {
                    self.consecutive_quiet_ms = 0;
                    Some(CrowdState::Rising)
                } else if self.consecutive_quiet_ms > self.cfg.falling_idle_timeout_ms {
                    self.consecutive_quiet_ms = 0;
                    self.consecutive_loud_ms = 0;
                    Some(CrowdState::Idle)
                } else {
                    None
                }
            }
        };

        let to = to?;
        self.state = to;
        self.ms_in_state = 0;
        debug!(?from, ?to, db, "state transition");
        Some(StateTransition { from, to })
    }
}
