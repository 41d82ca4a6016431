// gatewarden/src/main.rs
//
// Gatewarden — inline HTTP bot detection engine
//
// Three operational modes:
//   tail    — tail a JSONL request log emitted by the HTTP adapter
//   replay  — replay a captured log at scaled speed (testing/research)
//   eval    — run a labeled dataset and print precision/recall per detector
//
// Usage:
//   gatewarden --mode tail --path /var/log/edge/requests.jsonl
//   gatewarden --mode replay --path captured.jsonl --speed 10.0
//   gatewarden --mode eval --path labeled.jsonl --eval-threshold 0.55

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatewarden::config::EngineConfig;
use gatewarden::engine::Engine;
use gatewarden::events::{Action, RequestSnapshot};
use gatewarden::markov::MarkovTracker;
use gatewarden::snapshot::{FileSnapshotStore, MarkovSnapshotStore};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "gatewarden",
    about   = "Inline HTTP bot detection engine",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/gatewarden_feed.jsonl",
          help = "JSONL request log path")]
    path: PathBuf,

    #[arg(long, help = "Engine config file (JSON); defaults apply if absent")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/gatewarden_output",
          help = "Decision output directory")]
    output: PathBuf,

    #[arg(long, default_value = "0.55", help = "Bot threshold for eval mode")]
    eval_threshold: f64,

    #[arg(long, help = "Markov snapshot file to load at start and save at exit")]
    snapshot: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,
    Replay,
    Eval,
}

// ── Decision sink ─────────────────────────────────────────────────────────────

struct DecisionSink {
    out: PathBuf,
}

impl DecisionSink {
    fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out).context("creating output directory")?;
        Ok(Self { out })
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out.join(file))
            .await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }

    async fn dispatch(&self, result: &gatewarden::events::EvaluationResult) -> Result<()> {
        let line = result.to_jsonl() + "\n";
        if result.action != Action::Allow {
            self.write("decisions.jsonl", &line).await?;
        }
        self.write("audit_log.jsonl", &line).await?;
        Ok(())
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    engine: Arc<Engine>,
    sink:   Arc<DecisionSink>,
}

impl Pipeline {
    async fn process(&self, snapshot: RequestSnapshot) {
        let result = self.engine.evaluate_or_allow(snapshot).await;
        if result.action != Action::Allow {
            print_decision(&result);
        }
        if let Err(e) = self.sink.dispatch(&result).await {
            warn!("decision sink write failed: {e}");
        }
    }
}

fn print_decision(result: &gatewarden::events::EvaluationResult) {
    println!(
        "{} {}  p={:.3} conf={:.2}  sig={}  [{}]",
        result.evidence.risk_band,
        result.action,
        result.evidence.bot_probability,
        result.evidence.confidence,
        result.signature_id,
        result
            .evidence
            .contributions
            .iter()
            .filter(|c| c.confidence_delta > 0.0)
            .map(|c| c.detector_name.as_str())
            .collect::<Vec<_>>()
            .join(","),
    );
}

async fn print_stats_loop(engine: Arc<Engine>, start: Instant) {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        let stats = engine.stats();
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "── stats  uptime={:.0}s  requests={}  eps={:.1}  signatures={}  clusters={}  countries={} ──",
            elapsed,
            stats.total_requests,
            stats.total_requests as f64 / elapsed.max(1.0),
            stats.active_signatures,
            stats.cluster_count,
            stats.tracked_countries,
        );
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<RequestSnapshot>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}
    }

    info!("tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RequestSnapshot>(line) {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("parse error: {e}"),
                }
            }
            None => tokio::time::sleep(std::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<RequestSnapshot>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut snapshots: Vec<RequestSnapshot> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(s) = serde_json::from_str::<RequestSnapshot>(line) {
            snapshots.push(s);
        }
    }
    if snapshots.is_empty() {
        return Ok(());
    }
    snapshots.sort_by_key(|s| s.received_at);

    let base_ts = snapshots[0].received_at.timestamp_millis() as f64;
    let base_wall = Instant::now();

    for mut snapshot in snapshots {
        let offset = (snapshot.received_at.timestamp_millis() as f64 - base_ts) / speed / 1000.0;
        let target = base_wall + std::time::Duration::from_secs_f64(offset.max(0.0));
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        snapshot.received_at = Utc::now();
        if tx.send(snapshot).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("gatewarden=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&raw).context("parsing config")?
        }
        None => EngineConfig::default(),
    };

    let engine = Engine::init(config);
    engine.spawn_background();

    // Restore Markov baselines if a snapshot exists.
    if let Some(path) = &cli.snapshot {
        let store = FileSnapshotStore::new(path.clone());
        match store.load() {
            Ok(Some(snapshot)) => {
                restore_markov(&engine, snapshot);
                info!("markov snapshot restored from {}", path.display());
            }
            Ok(None) => info!("no markov snapshot at {}", path.display()),
            Err(e) => warn!("snapshot load failed: {e}"),
        }
    }

    println!("gatewarden {} — inline HTTP bot detection", env!("CARGO_PKG_VERSION"));

    if matches!(cli.mode, Mode::Eval) {
        let result =
            gatewarden::eval::run_eval(Arc::clone(&engine), &cli.path, cli.eval_threshold).await?;
        gatewarden::eval::print_report(&result);
        engine.shutdown();
        return Ok(());
    }

    let sink = Arc::new(DecisionSink::new(cli.output.clone())?);
    let pipeline = Arc::new(Pipeline { engine: Arc::clone(&engine), sink });
    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel::<RequestSnapshot>(16384);

    tokio::spawn(print_stats_loop(Arc::clone(&engine), start));

    match cli.mode {
        Mode::Tail => {
            println!("  mode: tail    {}", cli.path.display());
            println!("  output: {}\n", cli.output.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                tail_jsonl(path, tx, true).await.ok();
            });
        }
        Mode::Replay => {
            println!("  mode: replay  {}  speed={:.1}x", cli.path.display(), cli.speed);
            println!("  output: {}\n", cli.output.display());
            let path = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                replay_jsonl(path, tx, speed).await.ok();
            });
        }
        Mode::Eval => unreachable!("handled above"),
    }

    // One task per request; the engine's internals are already concurrent.
    let consumer = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move {
            while let Some(snapshot) = rx.recv().await {
                let p = Arc::clone(&pipeline);
                tokio::spawn(async move { p.process(snapshot).await });
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    consumer.abort();

    if let Some(path) = &cli.snapshot {
        let store = FileSnapshotStore::new(path.clone());
        if let Err(e) = save_markov(&engine, &store) {
            warn!("snapshot save failed: {e}");
        } else {
            info!("markov snapshot saved to {}", path.display());
        }
    }
    engine.shutdown();
    Ok(())
}

fn restore_markov(engine: &Arc<Engine>, snapshot: gatewarden::markov::tracker::MarkovSnapshot) {
    engine.services().markov.restore(snapshot);
}

fn save_markov(engine: &Arc<Engine>, store: &FileSnapshotStore) -> Result<()> {
    let tracker: &MarkovTracker = &engine.services().markov;
    store
        .save(&tracker.snapshot())
        .map_err(|e| anyhow::anyhow!(e))
}
