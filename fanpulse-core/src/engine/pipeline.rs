//! Blocking pipeline loop.
//!
//! ## Per-tick stages
//!
//! ```text
//! 1. Sleep to the next tick boundary (fixed period)
//! 2. pop_window with bounded lock wait — contention skips the tick
//! 3. SpectralAnalyzer → dB + magnitude spectrum
//! 4. BaselineEstimator::observe → adaptive thresholds
//! 5. ChantDetector::observe → chant flag (hysteresis)
//! 6. CrowdStateMachine::advance → Idle/Rising/Loud/Falling
//! 7. TierClassifier::evaluate → Bronze/Silver/Gold candidate
//! 8. BatchAggregator::on_tick → at most one ClassifiedEvent per window
//! ```
//!
//! The whole loop runs inside `spawn_blocking`, leaving the async executor
//! free for the host application. Every stage's state is owned by
//! [`ProcessorState`]; only the ring is shared, and only step 2 touches it.
//!
//! Time is logical: accumulators advance by the configured tick period, so
//! the same input sequence always produces the same decisions. The wall
//! clock enters exactly once, as the epoch base added to event timestamps.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    analysis::{BaselineEstimator, ChantDetector, SpectralAnalyzer},
    buffering::SharedSampleRing,
    classify::{BatchAggregator, BatchOutcome, CrowdStateMachine, TickSignal, TierClassifier},
    config::EngineConfig,
    events::{ActivityEvent, ClassifiedEvent},
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub ticks: AtomicUsize,
    pub ticks_skipped_contended: AtomicUsize,
    pub ticks_starved: AtomicUsize,
    pub windows_analyzed: AtomicUsize,
    pub baseline_recomputes: AtomicUsize,
    pub events_emitted: AtomicUsize,
    pub batches_suppressed: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.ticks_skipped_contended.store(0, Ordering::Relaxed);
        self.ticks_starved.store(0, Ordering::Relaxed);
        self.windows_analyzed.store(0, Ordering::Relaxed);
        self.baseline_recomputes.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.batches_suppressed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped_contended: self.ticks_skipped_contended.load(Ordering::Relaxed),
            ticks_starved: self.ticks_starved.load(Ordering::Relaxed),
            windows_analyzed: self.windows_analyzed.load(Ordering::Relaxed),
            baseline_recomputes: self.baseline_recomputes.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            batches_suppressed: self.batches_suppressed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub ticks: usize,
    pub ticks_skipped_contended: usize,
    pub ticks_starved: usize,
    pub windows_analyzed: usize,
    pub baseline_recomputes: usize,
    pub events_emitted: usize,
    pub batches_suppressed: usize,
}

/// All context the pipeline needs, passed as one struct so the closure
/// stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub ring: SharedSampleRing,
    pub running: Arc<AtomicBool>,
    pub event_tx: broadcast::Sender<ClassifiedEvent>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    /// UNIX ms captured once at start; added to logical event timestamps.
    pub epoch_base_ms: u64,
}

/// Owned state of every processing stage. Constructing one of these with a
/// synthetic window sequence exercises the full decision chain without
/// threads or clocks.
pub struct ProcessorState {
    analyzer: SpectralAnalyzer,
    baseline: BaselineEstimator,
    chant: ChantDetector,
    machine: CrowdStateMachine,
    tiers: TierClassifier,
    batch: BatchAggregator,
    /// Logical ms since pipeline start.
    elapsed_ms: u64,
}

/// Outcome of one analyzed tick.
pub struct TickOutput {
    pub activity: ActivityEvent,
    pub event: Option<ClassifiedEvent>,
    pub baseline_recomputed: bool,
    pub batch_suppressed: bool,
}

impl ProcessorState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            analyzer: SpectralAnalyzer::new(config.sample_rate_hz, config.fft_size),
            baseline: BaselineEstimator::new(config.baseline.clone()),
            chant: ChantDetector::new(
                config.chant.clone(),
                config.sample_rate_hz,
                config.fft_size,
            ),
            machine: CrowdStateMachine::new(config.state.clone()),
            tiers: TierClassifier::new(config.tier.clone()),
            batch: BatchAggregator::new(config.batch.clone()),
            elapsed_ms: 0,
        }
    }

    /// Logical time still advances on skipped or starved ticks.
    pub fn advance_idle(&mut self, tick_ms: u64) {
        self.elapsed_ms += tick_ms;
    }

    /// Run the full decision chain over one window of samples.
    pub fn advance_tick(&mut self, window: &[f32], seq: u64, tick_ms: u64) -> TickOutput {
        self.elapsed_ms += tick_ms;

        let measurement = self.analyzer.analyze(window);
        let baseline_recomputed = self.baseline.observe(measurement.db, tick_ms);
        let thresholds = self.baseline.thresholds();
        let snapshot = self.baseline.snapshot();

        let chant = self.chant.observe(&measurement.magnitudes);
        self.machine.advance(measurement.db, &thresholds, tick_ms);
        let tier = self
            .tiers
            .evaluate(&mut self.machine, measurement.db, &snapshot);

        let outcome = self.batch.on_tick(
            TickSignal {
                db: measurement.db,
                tier,
                chant_active: chant.active,
                in_loud: self.machine.state() == crate::classify::CrowdState::Loud,
                peak_hz: chant.peak_hz,
            },
            tick_ms,
            self.elapsed_ms,
            &snapshot,
            &thresholds,
        );

        let batch_suppressed = matches!(outcome, BatchOutcome::Suppressed);
        let event = match outcome {
            BatchOutcome::Emitted(event) => Some(*event),
            BatchOutcome::Open | BatchOutcome::Suppressed => None,
        };

        TickOutput {
            activity: ActivityEvent {
                seq,
                db: measurement.db,
                state: self.machine.state(),
                chant_active: chant.active,
            },
            event,
            baseline_recomputed,
            batch_suppressed,
        }
    }
}

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(ctx: PipelineContext) {
    info!(
        tick_ms = ctx.config.tick_period_ms,
        window = ctx.config.window_samples,
        fft = ctx.config.fft_size,
        "pipeline started"
    );

    let mut state = ProcessorState::new(&ctx.config);
    let tick = Duration::from_millis(ctx.config.tick_period_ms);
    let lock_wait = Duration::from_millis(ctx.config.ring.lock_wait_ms);
    let mut scratch: Vec<f32> = Vec::with_capacity(ctx.config.window_samples);

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(tick);
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }
        ctx.diagnostics.ticks.fetch_add(1, Ordering::Relaxed);

        // ── Window extraction, bounded wait ──────────────────────────────
        let available =
            match ctx
                .ring
                .pop_window(ctx.config.window_samples, &mut scratch, lock_wait)
            {
                Some(n) => n,
                None => {
                    // Liveness over completeness: the producer keeps the
                    // lock, we drop this analysis tick.
                    ctx.diagnostics
                        .ticks_skipped_contended
                        .fetch_add(1, Ordering::Relaxed);
                    state.advance_idle(ctx.config.tick_period_ms);
                    warn!("ring lock contended — skipping tick");
                    continue;
                }
            };

        if available < ctx.config.fft_size {
            // Not enough audio buffered yet (startup or upstream stall).
            ctx.diagnostics.ticks_starved.fetch_add(1, Ordering::Relaxed);
            state.advance_idle(ctx.config.tick_period_ms);
            debug!(available, "window starved — skipping tick");
            continue;
        }

        // ── Full decision chain ──────────────────────────────────────────
        let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
        let output = state.advance_tick(&scratch[..available], seq, ctx.config.tick_period_ms);
        ctx.diagnostics
            .windows_analyzed
            .fetch_add(1, Ordering::Relaxed);
        if output.baseline_recomputed {
            ctx.diagnostics
                .baseline_recomputes
                .fetch_add(1, Ordering::Relaxed);
        }
        if output.batch_suppressed {
            ctx.diagnostics
                .batches_suppressed
                .fetch_add(1, Ordering::Relaxed);
        }

        let _ = ctx.activity_tx.send(output.activity);

        if let Some(mut event) = output.event {
            event.timestamp_ms += ctx.epoch_base_ms;
            ctx.diagnostics.events_emitted.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.event_tx.send(event);
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        ticks = snap.ticks,
        skipped_contended = snap.ticks_skipped_contended,
        starved = snap.ticks_starved,
        windows = snap.windows_analyzed,
        baseline_recomputes = snap.baseline_recomputes,
        events = snap.events_emitted,
        suppressed = snap.batches_suppressed,
        "pipeline stopped — diagnostics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{CrowdState, Tier};

    const TICK_MS: u64 = 500;
    const WINDOW: usize = 512;

    fn test_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.fft_size = 256; // 62.5 Hz per bin at 16 kHz
        cfg.window_samples = WINDOW;
        cfg
    }

    /// Nyquist-rate square wave: a flat level with no vocal-band energy.
    fn ambience(amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    /// Pure tone at an exact bin center (312.5 Hz = bin 5).
    fn cheer_tone(amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 312.5 * i as f32 / 16_000.0).sin()
            })
            .collect()
    }

    /// Three well-separated vocal-band tones (bins 4, 8, 12): chant-like
    /// spectral spread.
    fn chant_window(amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                let mut sample = 0.0;
                for freq in [250.0, 500.0, 750.0] {
                    sample += amplitude * (2.0 * std::f32::consts::PI * freq * t).sin();
                }
                sample
            })
            .collect()
    }

    struct Harness {
        state: ProcessorState,
        seq: u64,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: ProcessorState::new(&test_config()),
                seq: 0,
            }
        }

        fn tick(&mut self, window: &[f32]) -> TickOutput {
            let out = self.state.advance_tick(window, self.seq, TICK_MS);
            self.seq += 1;
            out
        }
    }

    #[test]
    fn quiet_stream_never_emits() {
        let mut h = Harness::new();
        let quiet = ambience(0.003);
        for _ in 0..60 {
            let out = h.tick(&quiet);
            assert!(out.event.is_none());
            assert_eq!(out.activity.state, CrowdState::Idle);
        }
    }

    #[test]
    fn sustained_cheer_reaches_loud_and_classifies() {
        let mut h = Harness::new();
        let quiet = ambience(0.003);
        let cheer = cheer_tone(0.5);

        // 12 s of ambience settles the baseline near -50 dBFS.
        for _ in 0..24 {
            assert!(h.tick(&quiet).event.is_none());
        }

        let mut saw_loud = false;
        let mut events = Vec::new();
        for _ in 0..20 {
            let out = h.tick(&cheer);
            saw_loud |= out.activity.state == CrowdState::Loud;
            events.extend(out.event);
        }

        assert!(saw_loud, "a 30 dB surge must reach Loud");
        assert_eq!(events.len(), 1, "one batch window closed during the surge");
        let event = &events[0];
        assert!(event.tier >= Some(Tier::Bronze), "tier was {:?}", event.tier);
        assert!(event.peak_db > event.baseline_db + 5.0);
        assert!(event.duration_ms >= 2_000);
        // A single steady tone must not read as an organized chant.
        assert!(!event.chant_detected);
        assert!((0.0..=1.0).contains(&event.signal_quality));
        assert!((0.0..=1.0).contains(&event.detection_confidence));
    }

    #[test]
    fn pulsing_vocal_spread_sets_the_chant_flag() {
        let mut h = Harness::new();
        let quiet = ambience(0.003);
        let chant = chant_window(0.3);
        let rest = ambience(0.3);

        for _ in 0..24 {
            h.tick(&quiet);
        }

        // Two chant windows, one broadband rest, repeated: the envelope
        // ratio pulses between ~1 and ~0, which is what distinguishes a
        // chant from a steady tone.
        let mut chant_seen = false;
        let mut events = Vec::new();
        for i in 0..24 {
            let window = if i % 3 == 2 { &rest } else { &chant };
            let out = h.tick(window);
            chant_seen |= out.activity.chant_active;
            events.extend(out.event);
        }

        assert!(chant_seen, "pulsing vocal energy must activate the flag");
        assert!(!events.is_empty());
        assert!(events.iter().any(|e| e.chant_detected));
    }

    #[test]
    fn logical_clock_advances_on_idle_ticks() {
        let mut h = Harness::new();
        h.state.advance_idle(TICK_MS);
        h.state.advance_idle(TICK_MS);
        assert_eq!(h.state.elapsed_ms, 2 * TICK_MS);
    }

    #[test]
    fn diagnostics_reset_clears_all_counters() {
        let diag = PipelineDiagnostics::default();
        diag.ticks.store(5, Ordering::Relaxed);
        diag.events_emitted.store(2, Ordering::Relaxed);
        diag.reset();
        let snap = diag.snapshot();
        assert_eq!(snap.ticks, 0);
        assert_eq!(snap.events_emitted, 0);
    }
}
