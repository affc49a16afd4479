//! `FanPulseEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! FanPulseEngine::new(config)   → config validated, status = Idle
//!     └─► start()               → ring allocated, pipeline spawned,
//!         │                       returns the FrameIngestor producer
//!         │                       handle, status = Listening
//!         └─► stop()            → running = false, status = Stopped
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking. The engine is `Send + Sync`; wrap it in
//! `Arc` to share between the transport task and event consumers.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    buffering::{SampleRing, SharedSampleRing},
    config::EngineConfig,
    error::{FanPulseError, Result},
    events::{ActivityEvent, ClassifiedEvent, EngineStatus, EngineStatusEvent},
    ingest::{FrameIngestor, IngestCounters, IngestSnapshot},
};

/// Broadcast channel capacity: enough to absorb a slow consumer for many
/// batch windows.
const BROADCAST_CAP: usize = 256;

/// The top-level engine handle.
pub struct FanPulseEngine {
    config: EngineConfig,
    /// `true` while the pipeline thread is active.
    running: Arc<AtomicBool>,
    /// Canonical status (written via Mutex, read from host commands).
    status: Arc<Mutex<EngineStatus>>,
    event_tx: broadcast::Sender<ClassifiedEvent>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing tick sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    ingest_counters: Arc<IngestCounters>,
}

impl FanPulseEngine {
    /// Create a new engine. Fails fast on a structurally invalid
    /// configuration; does not start processing — call `start()`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            event_tx,
            activity_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            ingest_counters: Arc::new(IngestCounters::default()),
        })
    }

    /// Allocate the ring, spawn the blocking pipeline, and hand back the
    /// producer-side ingestor for the transport layer to feed.
    ///
    /// Must be called from within a tokio runtime (the pipeline runs in
    /// `spawn_blocking`). After `stop()`, the old pipeline thread winds
    /// down within one tick period; restarting sooner briefly overlaps
    /// with the draining thread, which holds no shared state but its own
    /// ring.
    ///
    /// # Errors
    /// `FanPulseError::AlreadyRunning` if already started.
    pub fn start(&self) -> Result<FrameIngestor> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FanPulseError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.ingest_counters.reset();
        self.seq.store(0, Ordering::Relaxed);
        self.set_status(EngineStatus::Listening, None);

        let ring = SharedSampleRing::new(SampleRing::new(&self.config.ring));
        let ingestor = FrameIngestor::new(
            ring.clone(),
            self.config.ring.max_frame_samples,
            Arc::clone(&self.ingest_counters),
        );

        let epoch_base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            ring,
            running: Arc::clone(&self.running),
            event_tx: self.event_tx.clone(),
            activity_tx: self.activity_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
            epoch_base_ms,
        };
        tokio::task::spawn_blocking(move || pipeline::run(ctx));

        info!("engine started — listening");
        Ok(ingestor)
    }

    /// Signal the pipeline to wind down after its current tick.
    ///
    /// # Errors
    /// `FanPulseError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(FanPulseError::NotRunning);
        }
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to classified crowd-noise events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClassifiedEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to per-tick level/state activity.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Subscribe to lifecycle status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Snapshot of ingestion counters (accepted/rejected/lost/dropped).
    pub fn ingest_snapshot(&self) -> IngestSnapshot {
        self.ingest_counters.snapshot()
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
