//! FlowGate CLI — run decision cycles and inspect their state.
//!
//! Commands:
//! - `run` — drive cycles on the configured interval (or a single one with `--once`)
//! - `score` — print the composite score breakdown and gate verdict for one symbol
//! - `cooldowns` — list symbols still in their post-displacement cooldown
//! - `export-events` — convert the JSONL decision log to CSV
//! - `check-config` — validate a config file and print its fingerprint

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowgate_core::domain::Candidate;
use flowgate_core::gate::EntryGate;
use flowgate_core::scoring;
use flowgate_runner::{
    export_events_csv, provider_for, read_events, run_scheduled, side_for, AppConfig, BestEffortProvider,
    CycleReport, CycleRunner, EventSink, FanoutSink, JsonlEventLog, PaperBroker, RetryingBroker, StateStore,
    TracingSink,
};

#[derive(Parser)]
#[command(name = "flowgate", about = "FlowGate — composite-score admission and displacement engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run decision cycles against the paper broker.
    Run {
        /// Path to a TOML config file.
        #[arg(long, default_value = "flowgate.toml")]
        config: PathBuf,

        /// Run a single cycle and print its report as JSON.
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Score one symbol and show the gate verdict.
    Score {
        /// Symbol to score.
        symbol: String,

        #[arg(long, default_value = "flowgate.toml")]
        config: PathBuf,

        /// Print the full breakdown as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List live cooldowns from the state directory.
    Cooldowns {
        #[arg(long, default_value = "flowgate.toml")]
        config: PathBuf,
    },
    /// Export the decision log as CSV.
    ExportEvents {
        #[arg(long, default_value = "flowgate.toml")]
        config: PathBuf,

        /// Read this JSONL file instead of the configured event log.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Write CSV here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a config file and print its fingerprint.
    CheckConfig {
        #[arg(long, default_value = "flowgate.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            once,
            max_cycles,
        } => run_cycles(&config, once, max_cycles),
        Commands::Score { symbol, config, json } => run_score(&config, &symbol, json),
        Commands::Cooldowns { config } => run_cooldowns(&config),
        Commands::ExportEvents { config, input, output } => run_export(&config, input, output),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn init_tracing() {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::from_file(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn run_cycles(config_path: &Path, once: bool, max_cycles: Option<u64>) -> Result<()> {
    let app = load_config(config_path)?;
    let store = StateStore::new(&app.runtime.state_dir);

    // the paper broker starts out holding whatever the book says we hold
    let restored = store.load_positions(app.engine.admission.max_positions)?;
    let paper = PaperBroker::new().with_holdings(
        restored
            .book
            .iter()
            .map(|p| (p.symbol.as_str(), p.side, p.quantity))
            .collect::<Vec<_>>(),
    );
    let broker = RetryingBroker::new(Arc::new(paper), &app.broker);

    let log_path = app.runtime.event_log_path();
    let log = JsonlEventLog::open(&log_path)
        .with_context(|| format!("failed to open event log {}", log_path.display()))?;
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink) as Arc<dyn EventSink>)
        .with(Arc::new(log));

    let mut runner = CycleRunner::new(
        app.engine.clone(),
        &app.runtime,
        provider_for(&app.runtime.snapshots),
        Box::new(broker),
        Arc::new(sink),
    )?
    .with_store(store)?;

    info!(
        config = runner.fingerprint().short(),
        weights = app.engine.version(),
        universe = app.runtime.universe.len(),
        held = runner.book().len(),
        "runner started"
    );

    if once {
        let report = runner.run_cycle(Utc::now())?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let print_report = |r: &CycleReport| {
        println!(
            "cycle {:>5}  admitted {:>2}  displaced {:>2}  rejected {:>2}  exited {:>2}  held {:>2}",
            r.cycle, r.admitted, r.displaced, r.rejected, r.exited, r.held
        );
    };
    let completed = run_scheduled(&mut runner, app.runtime.interval(), max_cycles, Some(&print_report), None)?;
    info!(completed, "runner stopped");
    Ok(())
}

fn run_score(config_path: &Path, symbol: &str, json: bool) -> Result<()> {
    let app = load_config(config_path)?;
    let provider = BestEffortProvider::new(provider_for(&app.runtime.snapshots));
    provider.prepare();
    let snapshot = provider.get_snapshot(symbol);

    let score = scoring::score_or_neutral(symbol, snapshot.as_ref(), &app.engine.scoring);
    let mut candidate = Candidate::new(side_for(snapshot.as_ref()), score.clone(), app.runtime.order_size);
    if let Some(snap) = &snapshot {
        if let Some(price) = snap.price() {
            candidate = candidate.with_price(price);
        }
        if let Some(t) = snap.technicals() {
            candidate = candidate.with_technicals(t);
        }
    }
    let evaluation = EntryGate::from_config(&app.engine.gate).evaluate(&candidate);

    if json {
        let out = serde_json::json!({ "score": score, "gate": evaluation });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Symbol:    {symbol} ({})", candidate.side.as_str());
    println!("Weights:   {}", score.weights_version);
    println!("Regime:    {}", score.regime.as_str());
    if score.defaulted {
        println!("Snapshot:  absent (neutral score)");
    }
    println!();
    println!("{:<20} {:>10}", "Feature", "Contrib");
    println!("{}", "-".repeat(31));
    for (name, contrib) in &score.components {
        let marker = if score.defaulted_features.contains(name) { " *" } else { "" };
        println!("{name:<20} {contrib:>10.4}{marker}");
    }
    println!("{}", "-".repeat(31));
    println!("{:<20} {:>10.4}", "toxicity penalty", -score.toxicity_penalty);
    println!("{:<20} {:>10.4}", "raw", score.raw);
    println!("{:<20} {:>10.4}", "freshness", score.freshness);
    println!("{:<20} {:>10.4}", "score", score.score);
    println!();
    println!("Gate:      {}", evaluation.verdict.code());
    if !score.defaulted_features.is_empty() {
        println!("(* neutral default used)");
    }
    Ok(())
}

fn run_cooldowns(config_path: &Path) -> Result<()> {
    let app = load_config(config_path)?;
    let store = StateStore::new(&app.runtime.state_dir);
    let registry = store.load_cooldowns(app.engine.cooldown.duration())?;
    let now = Utc::now();

    let active: Vec<_> = registry.active(now).collect();
    if active.is_empty() {
        println!("No active cooldowns ({})", store.cooldowns_path().display());
        return Ok(());
    }

    println!("{:<8} {:<26} {:>10}", "Symbol", "Displaced At", "Remaining");
    println!("{}", "-".repeat(46));
    for (symbol, at) in active {
        let left = registry.remaining(symbol, now);
        println!(
            "{:<8} {:<26} {:>7}m{:02}s",
            symbol,
            at.format("%Y-%m-%d %H:%M:%S UTC"),
            left.num_minutes(),
            left.num_seconds() % 60
        );
    }
    Ok(())
}

fn run_export(config_path: &Path, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let path = match input {
        Some(p) => p,
        None => load_config(config_path)?.runtime.event_log_path(),
    };
    let events = read_events(&path)?;
    let csv = export_events_csv(&events)?;

    match output {
        Some(out) => {
            std::fs::write(&out, csv).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Exported {} events to {}", events.len(), out.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

fn run_check_config(config_path: &Path) -> Result<()> {
    let app = load_config(config_path)?;
    let fingerprint = app.engine.fingerprint();
    println!("Config OK: {}", config_path.display());
    println!("Fingerprint:   {fingerprint}");
    println!("Weights:       {}", app.engine.version());
    println!("Features:      {}", app.engine.scoring.features.len());
    println!(
        "Capacity:      {} (hard cap {})",
        app.engine.admission.max_positions, app.engine.admission.hard_cap
    );
    println!("Universe:      {} symbols", app.runtime.universe.len());
    println!("Interval:      {}s", app.runtime.interval_secs);
    Ok(())
}
