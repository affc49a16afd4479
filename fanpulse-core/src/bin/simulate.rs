//! Synthetic crowd feed: drives the engine with generated PCM and prints
//! classified events as JSON lines on stdout.
//!
//! ```text
//! cargo run -p fanpulse-core --features simulate --bin simulate -- \
//!   [--seconds <n>] [--seed <n>]
//! ```
//!
//! The generator cycles through three phases — ambience, a cheer surge, and
//! an organized chant — so every pipeline stage gets exercised without a
//! stadium on hand. Logs go to stderr (`RUST_LOG` controls verbosity),
//! events to stdout.

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::Serialize;

use fanpulse_core::{AudioFrame, EngineConfig, FanPulseEngine};

const SAMPLE_RATE: u32 = 16_000;
/// 20 ms of audio per frame.
const FRAME_SAMPLES: usize = 320;

#[derive(Debug)]
struct Args {
    seconds: u64,
    seed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    seconds: u64,
    frames_sent: u64,
    events: usize,
    ticks: usize,
    ticks_skipped_contended: usize,
    ticks_starved: usize,
    windows_analyzed: usize,
    batches_suppressed: usize,
    samples_dropped: u64,
}

fn parse_args() -> Result<Args, String> {
    let mut seconds: u64 = 60;
    let mut seed: u64 = 7;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --seconds".into());
                };
                seconds = v
                    .parse::<u64>()
                    .map_err(|_| "invalid value for --seconds".to_string())?
                    .clamp(5, 600);
            }
            "--seed" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --seed".into());
                };
                seed = v
                    .parse::<u64>()
                    .map_err(|_| "invalid value for --seed".to_string())?;
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p fanpulse-core --features simulate --bin simulate -- \\
  [--seconds <n>] [--seed <n>]"
                );
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }
    Ok(Args { seconds, seed })
}

/// Crowd phase the generator is in, cycling every 60 s. Ambience dominates
/// so the rolling baseline stays anchored to the quiet level between
/// events.
enum Phase {
    Ambience,
    Cheer,
    Chant,
}

impl Phase {
    fn at(elapsed_ms: u64) -> Self {
        match (elapsed_ms / 1_000) % 60 {
            0..=44 => Phase::Ambience,
            45..=52 => Phase::Cheer,
            _ => Phase::Chant,
        }
    }
}

struct CrowdSynth {
    rng: SmallRng,
    sample_clock: u64,
}

impl CrowdSynth {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            sample_clock: 0,
        }
    }

    fn next_frame(&mut self, elapsed_ms: u64) -> Vec<i16> {
        let phase = Phase::at(elapsed_ms);
        (0..FRAME_SAMPLES)
            .map(|_| {
                let t = self.sample_clock as f32 / SAMPLE_RATE as f32;
                self.sample_clock += 1;
                let s = match phase {
                    // Low broadband murmur.
                    Phase::Ambience => 0.004 * self.rng.gen_range(-1.0..1.0f32),
                    // Broadband roar with a little flutter.
                    Phase::Cheer => {
                        let level = 0.35 + 0.05 * (2.0 * std::f32::consts::PI * 0.5 * t).sin();
                        level * self.rng.gen_range(-1.0..1.0f32)
                    }
                    // Vocal-band tones gated ~1.4 s on / 0.7 s off: energy
                    // concentrated and spread across bins, with an envelope
                    // that pulses at a rate the 500 ms tick can see.
                    Phase::Chant => {
                        let on = (elapsed_ms / 700) % 3 != 2;
                        if on {
                            let mut voice = 0.0;
                            for freq in [250.0, 500.0, 750.0] {
                                voice += (2.0 * std::f32::consts::PI * freq * t).sin();
                            }
                            0.15 * voice + 0.01 * self.rng.gen_range(-1.0..1.0f32)
                        } else {
                            0.01 * self.rng.gen_range(-1.0..1.0f32)
                        }
                    }
                };
                (s.clamp(-1.0, 1.0) * 32_767.0) as i16
            })
            .collect()
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("simulate: {e}");
            std::process::exit(2);
        }
    };

    let engine = match FanPulseEngine::new(EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("simulate: {e}");
            std::process::exit(1);
        }
    };

    let mut event_rx = engine.subscribe_events();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while let Ok(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("simulate: failed to serialize event: {e}"),
            }
            printed += 1;
        }
        printed
    });

    let mut ingestor = match engine.start() {
        Ok(ingestor) => ingestor,
        Err(e) => {
            eprintln!("simulate: {e}");
            std::process::exit(1);
        }
    };

    let mut synth = CrowdSynth::new(args.seed);
    let mut frame_timer = tokio::time::interval(Duration::from_millis(20));
    let total_frames = args.seconds * 50;
    let mut seq: u16 = 0;
    for frame_idx in 0..total_frames {
        frame_timer.tick().await;
        let samples = synth.next_frame(frame_idx * 20);
        // Rejections are telemetry, not failures; the generator never
        // produces one anyway.
        let _ = ingestor.push(&AudioFrame { seq, samples });
        seq = seq.wrapping_add(1);
    }

    engine.stop().expect("engine was running");
    // Let the pipeline thread drain its final tick before sampling counters.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let diagnostics = engine.diagnostics_snapshot();
    let ingest = engine.ingest_snapshot();
    drop(engine);

    let events = printer.await.unwrap_or(0);
    let summary = Summary {
        seconds: args.seconds,
        frames_sent: total_frames,
        events,
        ticks: diagnostics.ticks,
        ticks_skipped_contended: diagnostics.ticks_skipped_contended,
        ticks_starved: diagnostics.ticks_starved,
        windows_analyzed: diagnostics.windows_analyzed,
        batches_suppressed: diagnostics.batches_suppressed,
        samples_dropped: ingest.samples_dropped,
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("simulate: failed to serialize summary: {e}"),
    }
}
