// src/config.rs
//
// =============================================================================
// FLOWCALC: RUNTIME SETTINGS (v 0.3 )
// =============================================================================
//
// Shared command-line settings. Every flag falls back to an environment
// variable so containers can be configured without arguments.

use crate::engine::{ExternalEngine, DEFAULT_NORMAL_TERMINATION};
use crate::jobstore::JobStore;
use crate::workspace::WorkspaceRoot;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding one workspace per calculation.
    #[arg(long, env = "FLOWCALC_ROOT", default_value = "./modflow", global = true)]
    pub root: PathBuf,

    /// SQLite job database (default: <root>/modflow.db).
    #[arg(long, env = "FLOWCALC_DB", global = true)]
    pub db: Option<PathBuf>,
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| self.root.join("modflow.db"))
    }

    pub fn open_store(&self) -> Result<JobStore> {
        JobStore::open(self.db_path()).context("DB Init")
    }

    pub fn workspace_root(&self) -> Result<WorkspaceRoot> {
        WorkspaceRoot::new(&self.root)
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineSettings {
    /// Engine executable run inside each workspace.
    #[arg(long, env = "FLOWCALC_ENGINE")]
    pub engine: String,

    /// Engine argument; `{workspace}` and `{config}` are substituted.
    /// Use: --engine-arg run --engine-arg {config}
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Stdout text that marks a successful run.
    #[arg(long, env = "FLOWCALC_NORMAL_MSG", default_value = DEFAULT_NORMAL_TERMINATION)]
    pub normal_termination: String,

    /// Idle time between polls of an empty queue, in milliseconds.
    #[arg(long, env = "FLOWCALC_POLL_MS", default_value_t = 1000)]
    pub poll_ms: u64,
}

impl EngineSettings {
    pub fn engine(&self) -> ExternalEngine {
        ExternalEngine::new(self.engine.clone(), self.engine_args.clone())
            .with_normal_termination(self.normal_termination.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}
