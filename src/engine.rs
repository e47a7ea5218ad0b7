// src/engine.rs
//
// =============================================================================
// FLOWCALC: SIMULATION ENGINE PORT (v 0.3 )
// =============================================================================
//
// The Hexagonal Port.
//
// Responsibilities:
// 1. Define the `SimulationEngine` trait (The Contract).
// 2. Provide `ExternalEngine`, which runs a configured command inside the
//    workspace and captures its output into `engine.log`.
// 3. Path Safety: relative binaries are resolved against the launch
//    directory before the working directory changes.

use crate::workspace::ENGINE_LOG;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub const DEFAULT_NORMAL_TERMINATION: &str = "normal termination";

// ============================================================================
// 1. THE ENGINE TRAIT (The Contract)
// ============================================================================

/// What the engine reported for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutcome {
    pub success: bool,
    /// Free-form run report (engine stdout/stderr).
    pub report: String,
}

#[async_trait]
pub trait SimulationEngine: Send + Sync {
    /// Runs the calculation whose configuration document sits in `workspace`
    /// and writes every artifact into it.
    ///
    /// `Ok` with `success == false` is an engine failure (bad model,
    /// non-convergence). `Err` is an infrastructure fault.
    async fn run(&self, workspace: &Path) -> Result<EngineOutcome>;
}

// ============================================================================
// 2. EXTERNAL ENGINE (Process Adapter)
// ============================================================================

/// Runs `program args...` with the workspace as working directory.
///
/// The placeholders `{workspace}` and `{config}` in arguments are replaced by
/// the workspace path and the configuration document path.
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    program: String,
    args: Vec<String>,
    normal_termination: String,
}

impl ExternalEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            normal_termination: DEFAULT_NORMAL_TERMINATION.to_string(),
        }
    }

    /// Text that must appear in stdout for a run to count as successful.
    pub fn with_normal_termination(mut self, message: impl Into<String>) -> Self {
        self.normal_termination = message.into();
        self
    }

    fn expand_args(&self, workspace: &Path) -> Vec<String> {
        let ws = workspace.to_string_lossy();
        let config = workspace
            .join(crate::workspace::CONFIGURATION_JSON)
            .to_string_lossy()
            .to_string();
        self.args
            .iter()
            .map(|a| a.replace("{workspace}", &ws).replace("{config}", &config))
            .collect()
    }

    /// Helper to ensure we can find the binary after changing Current Working Directory.
    /// Bare command names are left for PATH lookup.
    fn resolve_path(&self, path: &str) -> String {
        if path.contains('/') || path.contains('\\') {
            if Path::new(path).is_absolute() {
                path.to_string()
            } else {
                std::env::current_dir()
                    .unwrap_or_default()
                    .join(path)
                    .to_string_lossy()
                    .to_string()
            }
        } else {
            path.to_string()
        }
    }
}

#[async_trait]
impl SimulationEngine for ExternalEngine {
    async fn run(&self, workspace: &Path) -> Result<EngineOutcome> {
        let program = self.resolve_path(&self.program);

        let mut cmd = Command::new(&program);
        cmd.args(self.expand_args(workspace));
        cmd.current_dir(workspace);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        log::info!("🚀 Launching engine '{}' in {:?}", program, workspace);
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn engine '{}' in '{:?}'", program, workspace))?;
        let output = child.wait_with_output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut report = stdout.to_string();
        if !stderr.trim().is_empty() {
            if !report.is_empty() && !report.ends_with('\n') {
                report.push('\n');
            }
            report.push_str(&stderr);
        }

        tokio::fs::write(workspace.join(ENGINE_LOG), &report)
            .await
            .context("Failed to write engine log")?;

        let terminated_normally = stdout
            .to_ascii_lowercase()
            .contains(&self.normal_termination.to_ascii_lowercase());
        let success = output.status.success() && terminated_normally;

        if !success {
            log::warn!(
                "Engine exited with {:?} (normal termination seen: {})",
                output.status.code(),
                terminated_normally
            );
        }

        Ok(EngineOutcome { success, report })
    }
}
