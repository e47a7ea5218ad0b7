// src/main.rs
//
// =============================================================================
// FLOWCALC: COMMANDER & ENTRY POINT (v 0.3 )
// =============================================================================
//
// The wiring center of the crate.
//
// Modes:
// 1. WORKER: polls the queue and runs calculations through the engine.
// 2. SUBMIT: ingests a configuration document (JSON or YAML).
// 3. QUERY:  status, details, layer, timeseries, budget, stats, jobs, files.
// 4. CLEANUP: removes engine outputs from a workspace.
//
// Query output is JSON on stdout; logs go to stderr.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::signal;

use flowcalc::config::{EngineSettings, Settings};
use flowcalc::facade::QueryFacade;
use flowcalc::logs::{JobLogSink, WorkspaceLogger};
use flowcalc::scheduler::{FixedInterval, Worker};
use flowcalc::{ingest, CalculationDocument, InsertOutcome};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "flowcalc",
    version,
    about = "Groundwater calculation queue and result index"
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the calculation worker until interrupted.
    Worker {
        #[command(flatten)]
        engine: EngineSettings,

        /// Worker id (default: hostname).
        #[arg(long)]
        id: Option<String>,
    },

    /// Queue a calculation document (.json, .yaml).
    Submit {
        /// Path to the configuration document.
        file: PathBuf,
    },

    /// State of the current job of a calculation.
    Status { calculation_id: String },

    /// Time index and file summary of a calculation.
    Details { calculation_id: String },

    /// One layer grid of a result type.
    Layer {
        calculation_id: String,
        /// head, drawdown or concentration.
        #[arg(long = "type", default_value = "head")]
        kind: String,
        /// totim, idx or kstpkper.
        #[arg(long, default_value = "idx")]
        by: String,
        /// Key for the addressing mode (e.g. `31`, `2`, `0,1`).
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = 0)]
        layer: usize,
        #[arg(long, default_value_t = 0)]
        substance: usize,
    },

    /// Values of one cell across all recorded times.
    Timeseries {
        calculation_id: String,
        #[arg(long = "type", default_value = "head")]
        kind: String,
        #[arg(long, default_value_t = 0)]
        layer: usize,
        #[arg(long)]
        row: usize,
        #[arg(long)]
        column: usize,
        #[arg(long, default_value_t = 0)]
        substance: usize,
    },

    /// Volumetric budget at one recorded time.
    Budget {
        calculation_id: String,
        #[arg(long, default_value = "idx")]
        by: String,
        #[arg(long)]
        key: String,
        /// cumulative or incremental.
        #[arg(long, default_value = "cumulative")]
        mode: String,
    },

    /// Simulated vs. observed heads.
    Observations { calculation_id: String },

    /// Job counts per state.
    Stats,

    /// Most recent jobs.
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List workspace files, or print one of them.
    Files {
        calculation_id: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove engine outputs, the state marker and the details cache.
    Cleanup { calculation_id: String },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let sink = JobLogSink::new();
    WorkspaceLogger::init(sink.clone()).map_err(|e| anyhow!("Logger init failed: {}", e))?;

    match cli.command {
        Commands::Worker { engine, id } => run_worker(&cli.settings, engine, id, sink).await,
        Commands::Submit { file } => run_submit(&cli.settings, file),
        query => run_query(&cli.settings, query),
    }
}

// ============================================================================
// 3. RUNTIME: WORKER
// ============================================================================

async fn run_worker(
    settings: &Settings,
    engine: EngineSettings,
    id: Option<String>,
    sink: JobLogSink,
) -> Result<()> {
    let store = Arc::new(settings.open_store()?);
    let root = settings.workspace_root()?;
    let shutdown_signal = Arc::new(AtomicBool::new(false));

    let mut worker = Worker::new(store, root, Arc::new(engine.engine()))
        .with_wait_strategy(FixedInterval(engine.poll_interval()))
        .with_log_sink(sink);
    if let Some(id) = id {
        worker = worker.with_id(id);
    }

    log::info!(
        "🚀 Booting worker {} | root {:?} | db {:?}",
        worker.id(),
        settings.root,
        settings.db_path()
    );

    // SIGNAL HANDLING
    // The flag is checked between jobs; a running engine is never interrupted.
    let sig_term = shutdown_signal.clone();
    tokio::spawn(async move {
        signal::ctrl_c().await.ok();
        log::warn!("🛑 Interrupt received. Stopping after the current job...");
        sig_term.store(true, Ordering::SeqCst);
    });

    worker.run(shutdown_signal).await
}

// ============================================================================
// 4. INGESTION
// ============================================================================

fn run_submit(settings: &Settings, file: PathBuf) -> Result<()> {
    let doc = CalculationDocument::load(&file)?;
    let store = settings.open_store()?;
    let root = settings.workspace_root()?;

    let outcome = ingest::submit(&store, &root, &doc)?;
    if outcome == InsertOutcome::Skipped {
        log::warn!("Calculation {} is already queued or running", doc.calculation_id);
    }
    print_json(&serde_json::json!({
        "calculation_id": doc.calculation_id,
        "result": outcome,
    }))
}

// ============================================================================
// 5. QUERIES
// ============================================================================

fn run_query(settings: &Settings, command: Commands) -> Result<()> {
    let facade = QueryFacade::new(Arc::new(settings.open_store()?), settings.workspace_root()?);

    match command {
        Commands::Status { calculation_id } => print_json(&facade.get_job_status(&calculation_id)?),
        Commands::Details { calculation_id } => print_json(&facade.get_details(&calculation_id)?),
        Commands::Layer {
            calculation_id,
            kind,
            by,
            key,
            layer,
            substance,
        } => print_json(&facade.get_layer(&calculation_id, &kind, &by, &key, layer, substance)?),
        Commands::Timeseries {
            calculation_id,
            kind,
            layer,
            row,
            column,
            substance,
        } => print_json(&facade.get_time_series(&calculation_id, &kind, layer, row, column, substance)?),
        Commands::Budget {
            calculation_id,
            by,
            key,
            mode,
        } => print_json(&facade.get_budget(&calculation_id, &by, &key, &mode)?),
        Commands::Observations { calculation_id } => {
            print_json(&facade.get_observations(&calculation_id)?)
        }
        Commands::Stats => print_json(&facade.queue_stats()?),
        Commands::Jobs { limit } => print_json(&facade.list_jobs(limit)?),
        Commands::Files {
            calculation_id,
            name: Some(name),
        } => print_json(&facade.read_file(&calculation_id, &name)?),
        Commands::Files {
            calculation_id,
            name: None,
        } => print_json(&facade.list_files(&calculation_id)?),
        Commands::Cleanup { calculation_id } => print_json(&facade.cleanup(&calculation_id)?),
        Commands::Worker { .. } | Commands::Submit { .. } => {
            Err(anyhow!("not a query command"))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
