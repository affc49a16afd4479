//! # fanpulse-core
//!
//! Crowd-noise detection engine: tiered cheer intensity and organized
//! chanting from a live 16 kHz mono PCM stream.
//!
//! ## Architecture
//!
//! ```text
//! Transport → FrameIngestor → guarded SampleRing → Pipeline(spawn_blocking)
//!                                                       │
//!                                    Spectral → Baseline → Chant
//!                                                       │
//!                                     StateMachine → Tier → Batch
//!                                                       │
//!                                  broadcast::Sender<ClassifiedEvent>
//! ```
//!
//! The ingest path is cheap and never blocks on analysis. All analysis
//! state is owned by the pipeline thread; the ring is the only shared
//! structure, and the pipeline gives up on it rather than stall the
//! producer.
//!
//! There are no fatal states past construction: malformed frames become
//! counters, overflow becomes drop-oldest, statistical degeneracy becomes
//! guarded fallbacks, and lock contention becomes a skipped tick.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod buffering;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;

// Convenience re-exports for downstream crates
pub use classify::Tier;
pub use config::EngineConfig;
pub use engine::FanPulseEngine;
pub use error::FanPulseError;
pub use events::{ActivityEvent, ClassifiedEvent, EngineStatus, EngineStatusEvent};
pub use ingest::{AudioFrame, FrameIngestor, FrameReject};
