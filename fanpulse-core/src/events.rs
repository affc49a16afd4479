//! Event types crossing the emission boundary.
//!
//! These structs define the logical schema; how they travel (JSON over a
//! socket, binary RPC, a ledger write) is the consuming layer's business.
//! Field names serialize in camelCase to match the FanPulse gateway schema.

use serde::{Deserialize, Serialize};

use crate::classify::{CrowdState, Tier};

// ---------------------------------------------------------------------------
// Classified events
// ---------------------------------------------------------------------------

/// One significant crowd-noise event, at most one per batch window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedEvent {
    /// Intensity tier, absent for chant-only or sustained-loud events that
    /// never cleared a tier band.
    pub tier: Option<Tier>,
    /// Loudest dB reading in the window.
    pub peak_db: f32,
    /// Cumulative active (Loud-state or chanting) time inside the window.
    pub duration_ms: u32,
    /// UNIX milliseconds of the peak reading.
    pub timestamp_ms: u64,
    pub chant_detected: bool,
    /// Baseline median at emission time.
    pub baseline_db: f32,
    /// The adaptive loud threshold that was in force.
    pub dynamic_threshold: f32,
    /// How far the peak cleared the dynamic threshold.
    pub threshold_offset_db: f32,
    /// Baseline IQR at emission time.
    pub environment_iqr: f32,
    /// Peak prominence over the window's mean level, normalized to [0, 1].
    pub signal_quality: f32,
    /// Blend of the satisfied emission criteria, in [0, 1].
    pub detection_confidence: f32,
    /// Dominant vocal-band frequency near the peak, Hz.
    pub frequency_peak: Option<f32>,
    /// Ambient level context (baseline median), kept for gateway
    /// compatibility.
    pub background_noise: Option<f32>,
}

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

/// Emitted once per analyzed tick: the live level and machine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Monotonically increasing tick sequence number.
    pub seq: u64,
    /// Window level in dBFS.
    pub db: f32,
    pub state: CrowdState,
    pub chant_active: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the FanPulse engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Actively consuming frames and classifying.
    Listening,
    /// Pipeline stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> ClassifiedEvent {
        ClassifiedEvent {
            tier: Some(Tier::Silver),
            peak_db: -18.4,
            duration_ms: 5_500,
            timestamp_ms: 1_712_000_000_000,
            chant_detected: true,
            baseline_db: -48.0,
            dynamic_threshold: -32.0,
            threshold_offset_db: 13.6,
            environment_iqr: 6.0,
            signal_quality: 0.82,
            detection_confidence: 0.9,
            frequency_peak: Some(312.5),
            background_noise: Some(-48.0),
        }
    }

    #[test]
    fn classified_event_serializes_camel_case() {
        let json = serde_json::to_value(sample_event()).expect("serialize event");
        assert_eq!(json["tier"], "silver");
        assert_eq!(json["durationMs"], 5_500);
        assert_eq!(json["chantDetected"], true);
        assert_eq!(json["timestampMs"], 1_712_000_000_000u64);
        let peak = json["peakDb"].as_f64().expect("peakDb is a number");
        assert!((peak + 18.4).abs() < 1e-5);
        assert!(json["frequencyPeak"].as_f64().is_some());

        let round_trip: ClassifiedEvent =
            serde_json::from_value(json).expect("deserialize event");
        assert_eq!(round_trip.tier, Some(Tier::Silver));
        assert_eq!(round_trip.duration_ms, 5_500);
    }

    #[test]
    fn untiered_event_serializes_null_tier() {
        let mut event = sample_event();
        event.tier = None;
        let json = serde_json::to_value(event).expect("serialize event");
        assert!(json["tier"].is_null());
    }

    #[test]
    fn activity_event_serializes_state_lowercase() {
        let event = ActivityEvent {
            seq: 41,
            db: -44.2,
            state: CrowdState::Rising,
            chant_active: false,
        };
        let json = serde_json::to_value(event).expect("serialize activity");
        assert_eq!(json["state"], "rising");
        assert_eq!(json["chantActive"], false);
        assert_eq!(json["seq"], 41);
    }

    #[test]
    fn engine_status_round_trips() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status");
        assert_eq!(json["status"], "listening");
        let back: EngineStatusEvent = serde_json::from_value(json).expect("deserialize status");
        assert_eq!(back.status, EngineStatus::Listening);
    }
}
