//! Replays a recorded transcript against a script and prints a JSON report.
//!
//! Each non-empty transcript line is pushed as one finalized batch. With
//! `--coalesce`, lines go through a `BatchCoalescer` using the configured
//! `coalesceDelayMs` instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use cuetrack_core::engine::DiagnosticsSnapshot;
use cuetrack_core::{
    AlignmentEngine, AlignmentUpdateEvent, BatchCoalescer, EngineConfig, RejectedEvent, Script, UpdateSource,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    script: PathBuf,
    transcript: PathBuf,
    config: Option<PathBuf>,
    precision: Option<u8>,
    output: Option<PathBuf>,
    strict: bool,
    coalesce: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    script: String,
    transcript: String,
    script_words: usize,
    readable_words: usize,
    attachments: usize,
    batches: usize,
    final_cursor: usize,
    final_display_position: usize,
    coverage: f64,
    elapsed_ms: f64,
    updates: Vec<AlignmentUpdateEvent>,
    rejections: Vec<RejectedEvent>,
    diagnostics: DiagnosticsSnapshot,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cuetrack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("replay failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(precision) = args.precision {
        config.matcher.precision = precision;
    }

    let script_text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;
    if args.strict {
        Script::parse_strict(&script_text).context("script markup")?;
    }
    let transcript = std::fs::read_to_string(&args.transcript)
        .with_context(|| format!("reading transcript {}", args.transcript.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let mut report = runtime.block_on(replay(config, &script_text, &transcript, args.coalesce))?;
    report.script = args.script.display().to_string();
    report.transcript = args.transcript.display().to_string();

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing report {}", path.display()))?;
            eprintln!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn replay(
    config: EngineConfig,
    script_text: &str,
    transcript: &str,
    coalesce: bool,
) -> anyhow::Result<Report> {
    let engine = Arc::new(AlignmentEngine::new(config));
    let mut updates = engine.subscribe_updates();
    let mut rejections = engine.subscribe_rejections();

    let script = engine.load_script(script_text);
    engine.start()?;

    let started = Instant::now();
    let mut batches = 0usize;
    let lines = transcript.lines().map(str::trim).filter(|l| !l.is_empty());
    if coalesce {
        let coalescer = BatchCoalescer::from_config(Arc::clone(&engine))?;
        for line in lines {
            coalescer.push(line)?;
            batches += 1;
        }
        coalescer.close().await?;
    } else {
        for line in lines {
            engine.push_batch(line)?;
            batches += 1;
        }
    }
    engine.stop_and_drain().await?;
    let elapsed = started.elapsed();

    let updates = drain(&mut updates)
        .into_iter()
        .filter(|u| u.source == UpdateSource::Speech)
        .collect::<Vec<_>>();
    let rejections = drain(&mut rejections);

    let readable_words = script.mapper().display_len();
    let final_display_position = engine.display_position();
    Ok(Report {
        script: String::new(),
        transcript: String::new(),
        script_words: script.len(),
        readable_words,
        attachments: script.attachments().len(),
        batches,
        final_cursor: engine.cursor(),
        final_display_position,
        coverage: if readable_words == 0 {
            0.0
        } else {
            final_display_position as f64 / readable_words as f64
        },
        elapsed_ms: duration_ms(elapsed),
        updates,
        rejections,
        diagnostics: engine.diagnostics_snapshot(),
    })
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "report is missing events; broadcast buffer overflowed");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    out
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

fn parse_args() -> anyhow::Result<Args> {
    let mut script: Option<PathBuf> = None;
    let mut transcript: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut precision: Option<u8> = None;
    let mut output: Option<PathBuf> = None;
    let mut strict = false;
    let mut coalesce = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--script" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --script");
                };
                script = Some(PathBuf::from(v));
            }
            "--transcript" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --transcript");
                };
                transcript = Some(PathBuf::from(v));
            }
            "--config" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --config");
                };
                config = Some(PathBuf::from(v));
            }
            "--precision" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --precision");
                };
                let value = v
                    .parse::<u8>()
                    .context("invalid value for --precision")?
                    .min(100);
                precision = Some(value);
            }
            "--output" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --output");
                };
                output = Some(PathBuf::from(v));
            }
            "--strict" => strict = true,
            "--coalesce" => coalesce = true,
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p cuetrack-core --bin replay -- \\
  --script <file> --transcript <file> [--config <file.json>] [--precision <0-100>] \\
  [--output <file.json>] [--strict] [--coalesce]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    let Some(script) = script else {
        bail!("--script is required");
    };
    let Some(transcript) = transcript else {
        bail!("--transcript is required");
    };
    Ok(Args {
        script,
        transcript,
        config,
        precision,
        output,
        strict,
        coalesce,
    })
}
