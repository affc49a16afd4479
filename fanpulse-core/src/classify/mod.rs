//! Event classification: the crowd state machine, tier assignment, and the
//! batch aggregator that turns per-tick signals into at most one emitted
//! event per window. All state here is owned by the processing context.

pub mod batch;
pub mod state;
pub mod tier;

pub use batch::{BatchAggregator, BatchOutcome, TickSignal};
pub use state::{CrowdState, CrowdStateMachine, StateTransition};
pub use tier::{Tier, TierClassifier};
