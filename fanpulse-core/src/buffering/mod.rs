//! Mutex-guarded circular sample store shared by the two pipeline contexts.
//!
//! ## Concurrency contract
//!
//! The ring is the only structure touched by both the producer (frame
//! ingestion) and the consumer (processing tick). Both sides hold the lock
//! only for a bounded memcpy:
//!
//! - `push_samples` locks unconditionally — the consumer's critical section
//!   is short, so the producer's wait is bounded by design.
//! - `pop_window` acquires with `try_lock_for` and gives up after the
//!   configured wait. The caller skips that analysis tick; the producer is
//!   never stalled by a slow consumer.
//!
//! ## Overflow policy
//!
//! When occupancy crosses the high-water mark after an append, a fixed
//! fraction of capacity is discarded oldest-first. Freshness wins over
//! completeness under sustained overload; the discard is reported to the
//! caller as a sample count, not as an error.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::RingConfig;

/// Fixed-capacity circular f32 sample store. Single-threaded core; see
/// [`SharedSampleRing`] for the guarded two-context handle.
///
/// Invariant: `occupied <= capacity` after every operation.
#[derive(Debug)]
pub struct SampleRing {
    buf: Box<[f32]>,
    /// Next write index.
    head: usize,
    /// Oldest retained sample index.
    tail: usize,
    occupied: usize,
    /// Occupancy (samples) above which the overflow valve opens.
    high_water: usize,
    /// Samples discarded per valve opening.
    drop_chunk: usize,
}

impl SampleRing {
    /// Allocate a ring from its configuration. Called once at engine start;
    /// the buffer is never resized afterwards.
    pub fn new(cfg: &RingConfig) -> Self {
        let capacity = cfg.capacity_samples;
        let high_water = ((capacity as f64) * f64::from(cfg.high_water)) as usize;
        let drop_chunk = (((capacity as f64) * f64::from(cfg.drop_fraction)) as usize).max(1);
        Self {
            buf: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            occupied: 0,
            high_water: high_water.max(1),
            drop_chunk,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Append samples at the head, wrapping modulo capacity.
    ///
    /// Returns the number of samples discarded to make room: oldest buffered
    /// samples when the high-water valve opens, plus the leading portion of
    /// an input longer than the whole ring (only possible with degenerate
    /// configurations; frame sizes are validated upstream).
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let capacity = self.capacity();
        let mut dropped = 0;

        let mut incoming = samples;
        if incoming.len() > capacity {
            dropped += incoming.len() - capacity;
            incoming = &incoming[incoming.len() - capacity..];
        }

        // Make room for the whole write before touching the buffer.
        if self.occupied + incoming.len() > capacity {
            let excess = self.occupied + incoming.len() - capacity;
            self.advance_tail(excess);
            dropped += excess;
        }

        // At most two contiguous segments.
        let first = (capacity - self.head).min(incoming.len());
        self.buf[self.head..self.head + first].copy_from_slice(&incoming[..first]);
        let rest = incoming.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&incoming[first..]);
        }
        self.head = (self.head + incoming.len()) % capacity;
        self.occupied += incoming.len();

        if self.occupied > self.high_water {
            let chunk = self.drop_chunk.min(self.occupied);
            self.advance_tail(chunk);
            dropped += chunk;
        }

        debug_assert!(self.occupied <= capacity);
        debug_assert_eq!(
            self.occupied % capacity,
            (self.head + capacity - self.tail) % capacity,
        );
        dropped
    }

    /// Copy the most recent `n` samples (or all of them, if fewer are
    /// buffered) into `out`, oldest first. Non-consuming: successive windows
    /// may overlap. Returns the number of samples copied.
    pub fn copy_recent(&self, n: usize, out: &mut Vec<f32>) -> usize {
        let count = n.min(self.occupied);
        out.clear();
        if count == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let start = (self.tail + (self.occupied - count)) % capacity;
        let first = (capacity - start).min(count);
        out.extend_from_slice(&self.buf[start..start + first]);
        if count > first {
            out.extend_from_slice(&self.buf[..count - first]);
        }
        count
    }

    fn advance_tail(&mut self, n: usize) {
        let n = n.min(self.occupied);
        self.tail = (self.tail + n) % self.capacity();
        self.occupied -= n;
    }
}

/// Cheaply clonable handle to a [`SampleRing`] behind a `parking_lot::Mutex`.
///
/// One clone lives with the frame ingestor (writer), one with the pipeline
/// (reader). Additional clones are harmless but the design assumes a single
/// writer and a single reader.
#[derive(Debug, Clone)]
pub struct SharedSampleRing {
    inner: Arc<Mutex<SampleRing>>,
}

impl SharedSampleRing {
    pub fn new(ring: SampleRing) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ring)),
        }
    }

    /// Producer side: append samples, discarding oldest data per the
    /// overflow policy. Returns the discarded sample count.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        self.inner.lock().push_samples(samples)
    }

    /// Consumer side: copy the most recent `n` samples into `out`, waiting
    /// at most `wait` for the lock. `None` means the tick should be skipped;
    /// `Some(count)` is the number of samples actually available.
    pub fn pop_window(&self, n: usize, out: &mut Vec<f32>, wait: Duration) -> Option<usize> {
        let ring = self.inner.try_lock_for(wait)?;
        Some(ring.copy_recent(n, out))
    }

    /// Current occupancy snapshot (diagnostics only).
    pub fn occupied(&self) -> usize {
        self.inner.lock().occupied()
    }
}
