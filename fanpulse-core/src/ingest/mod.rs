//! Frame ingestion boundary.
//!
//! The transport layer (out of scope here) delivers PCM frames as
//! `{sequence, length, samples}`. This module validates them, tracks
//! sequence continuity, and copies the payload into the shared ring.
//!
//! ## Contract
//!
//! - Malformed frames are rejected with a typed reason, counted, and leave
//!   the ring untouched. Rejection is telemetry, not an error path.
//! - Sequence gaps (mod 65536) are lost-frame telemetry; ingestion never
//!   halts on them.
//! - `push` is cheap and bounded: one validation pass, one i16→f32 convert
//!   into a reused scratch buffer, one locked memcpy into the ring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::buffering::SharedSampleRing;

/// Why a frame was refused at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameReject {
    #[error("empty frame payload")]
    Empty,

    #[error("payload length {len} is not sample-aligned")]
    Misaligned { len: usize },

    #[error("frame holds {samples} samples, limit is {max}")]
    Oversized { samples: usize, max: usize },
}

/// A single PCM frame from the ingestion boundary.
///
/// Consumed immediately: the ingestor copies the samples into the ring and
/// the frame is discarded.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Wrapping 16-bit sequence counter assigned by the producer.
    pub seq: u16,
    /// Mono little-endian PCM, already decoded to i16.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Decode a raw transport payload (little-endian i16 PCM). The declared
    /// payload length must equal sample count × 2; odd lengths are rejected.
    pub fn from_payload(seq: u16, payload: &[u8]) -> Result<Self, FrameReject> {
        if payload.is_empty() {
            return Err(FrameReject::Empty);
        }
        if payload.len() % 2 != 0 {
            return Err(FrameReject::Misaligned {
                len: payload.len(),
            });
        }
        let samples = payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { seq, samples })
    }
}

/// Ingestion counters, shared with the engine for observability.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub frames_lost: AtomicU64,
    pub samples_in: AtomicU64,
    pub samples_dropped: AtomicU64,
}

impl IngestCounters {
    pub fn reset(&self) {
        self.frames_accepted.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
        self.frames_lost.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_lost: self.frames_lost.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSnapshot {
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub frames_lost: u64,
    pub samples_in: u64,
    pub samples_dropped: u64,
}

/// Producer-side handle: owns sequence tracking and the write half of the
/// ring. One ingestor per engine start; the transport calls `push` (or
/// `push_payload`) for every arriving frame.
pub struct FrameIngestor {
    ring: SharedSampleRing,
    max_frame_samples: usize,
    expected_seq: Option<u16>,
    counters: Arc<IngestCounters>,
    convert_buf: Vec<f32>,
}

impl FrameIngestor {
    /// Usually obtained from `FanPulseEngine::start`; constructing one
    /// directly is for embedding the pipeline without the engine wrapper.
    pub fn new(
        ring: SharedSampleRing,
        max_frame_samples: usize,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            ring,
            max_frame_samples,
            expected_seq: None,
            counters,
            convert_buf: Vec::with_capacity(max_frame_samples),
        }
    }

    /// Validate and ingest one frame.
    ///
    /// # Errors
    /// `FrameReject` for malformed frames. The reject is already counted and
    /// logged; callers typically discard it.
    pub fn push(&mut self, frame: &AudioFrame) -> Result<(), FrameReject> {
        if let Err(reject) = self.validate(frame) {
            self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(seq = frame.seq, %reject, "rejected audio frame");
            return Err(reject);
        }

        if let Some(expected) = self.expected_seq {
            let gap = frame.seq.wrapping_sub(expected);
            if gap != 0 {
                self.counters
                    .frames_lost
                    .fetch_add(u64::from(gap), Ordering::Relaxed);
                debug!(
                    expected,
                    got = frame.seq,
                    gap,
                    "sequence gap — counting lost frames"
                );
            }
        }
        self.expected_seq = Some(frame.seq.wrapping_add(1));

        self.convert_buf.clear();
        self.convert_buf
            .extend(frame.samples.iter().map(|&s| f32::from(s) / 32768.0));

        let dropped = self.ring.push_samples(&self.convert_buf);
        self.counters.frames_accepted.fetch_add(1, Ordering::Relaxed);
        self.counters
            .samples_in
            .fetch_add(frame.samples.len() as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.counters
                .samples_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(dropped, "ring overflow valve opened");
        }
        Ok(())
    }

    /// Decode and ingest a raw transport payload in one call.
    pub fn push_payload(&mut self, seq: u16, payload: &[u8]) -> Result<(), FrameReject> {
        let frame = AudioFrame::from_payload(seq, payload).map_err(|reject| {
            self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(seq, %reject, "rejected audio payload");
            reject
        })?;
        self.push(&frame)
    }

    pub fn counters(&self) -> IngestSnapshot {
        self.counters.snapshot()
    }

    fn validate(&self, frame: &AudioFrame) -> Result<(), FrameReject> {
        if frame.samples.is_empty() {
            return Err(FrameReject::Empty);
        }
        if frame.samples.len() > self.max_frame_samples {
            return Err(FrameReject::Oversized {
                samples: frame.samples.len(),
                max: self.max_frame_samples,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::SampleRing;
    use crate::config::RingConfig;
    use std::time::Duration;

    fn test_ingestor(max_frame_samples: usize) -> (FrameIngestor, SharedSampleRing) {
        let ring = SharedSampleRing::new(SampleRing::new(&RingConfig {
            capacity_samples: 4_096,
            max_frame_samples,
            ..RingConfig::default()
        }));
        let counters = Arc::new(IngestCounters::default());
        (
            FrameIngestor::new(ring.clone(), max_frame_samples, counters),
            ring,
        )
    }

    fn frame(seq: u16, len: usize) -> AudioFrame {
        AudioFrame {
            seq,
            samples: vec![1_000; len],
        }
    }

    #[test]
    fn accepted_frame_lands_in_the_ring() {
        let (mut ingestor, ring) = test_ingestor(512);
        ingestor.push(&frame(0, 320)).expect("valid frame");

        let mut out = Vec::new();
        let n = ring
            .pop_window(320, &mut out, Duration::from_millis(10))
            .expect("uncontended");
        assert_eq!(n, 320);
        assert!((out[0] - 1_000.0 / 32768.0).abs() < 1e-6);
        assert_eq!(ingestor.counters().frames_accepted, 1);
    }

    #[test]
    fn empty_and_oversized_frames_are_rejected_without_side_effects() {
        let (mut ingestor, ring) = test_ingestor(512);
        assert_eq!(ingestor.push(&frame(0, 0)), Err(FrameReject::Empty));
        assert_eq!(
            ingestor.push(&frame(0, 513)),
            Err(FrameReject::Oversized {
                samples: 513,
                max: 512
            })
        );
        assert_eq!(ring.occupied(), 0);

        let counters = ingestor.counters();
        assert_eq!(counters.frames_rejected, 2);
        assert_eq!(counters.frames_accepted, 0);
        // Rejected frames must not advance sequence tracking either.
        ingestor.push(&frame(7, 8)).expect("valid frame");
        assert_eq!(ingestor.counters().frames_lost, 0);
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        assert!(matches!(
            AudioFrame::from_payload(3, &[1, 2, 3]),
            Err(FrameReject::Misaligned { len: 3 })
        ));
    }

    #[test]
    fn payload_decodes_little_endian() {
        let frame = AudioFrame::from_payload(9, &[0x01, 0x00, 0xFF, 0x7F]).expect("aligned");
        assert_eq!(frame.samples, vec![1, i16::MAX]);
    }

    #[test]
    fn sequence_gaps_count_lost_frames_but_never_halt() {
        let (mut ingestor, _ring) = test_ingestor(512);
        ingestor.push(&frame(10, 8)).expect("first frame");
        ingestor.push(&frame(11, 8)).expect("consecutive");
        ingestor.push(&frame(14, 8)).expect("gap of 2");
        assert_eq!(ingestor.counters().frames_lost, 2);
        assert_eq!(ingestor.counters().frames_accepted, 3);
    }

    #[test]
    fn sequence_gap_accounting_wraps_mod_65536() {
        let (mut ingestor, _ring) = test_ingestor(512);
        ingestor.push(&frame(u16::MAX, 8)).expect("frame 65535");
        ingestor.push(&frame(1, 8)).expect("wrapped with one lost");
        assert_eq!(ingestor.counters().frames_lost, 1);
    }
}
