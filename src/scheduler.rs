// src/scheduler.rs
//
// =============================================================================
// FLOWCALC: CALCULATION WORKER (v 0.3 )
// =============================================================================
//
// The Local Scheduler.
//
// Responsibilities:
// 1. Polls the JobStore for the oldest queued job.
// 2. Drives the job through QUEUED -> RUNNING -> SUCCESS | FAILED | ERROR.
// 3. Mirrors every state into the workspace marker so readers never depend
//    on the store.
// 4. Captures engine errors and panics as ERROR with the full error chain.
//
// One job at a time. No retry: a job gets exactly one attempt per enqueue.

use crate::core::{Job, JobState};
use crate::engine::{EngineOutcome, SimulationEngine};
use crate::jobstore::JobStore;
use crate::logs::JobLogSink;
use crate::workspace::{Workspace, WorkspaceRoot, DEBUG_LOG};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

// ============================================================================
// 1. POLICIES
// ============================================================================

/// How the worker idles when the queue is empty.
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    async fn idle(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl Default for FixedInterval {
    fn default() -> Self {
        Self(DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl WaitStrategy for FixedInterval {
    async fn idle(&self) {
        tokio::time::sleep(self.0).await;
    }
}

/// Long engine reports are cut to their head and tail before being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLimit {
    pub head: usize,
    pub tail: usize,
}

impl Default for ReportLimit {
    fn default() -> Self {
        Self { head: 40, tail: 10 }
    }
}

impl ReportLimit {
    pub fn summarize(&self, report: &str) -> String {
        let lines: Vec<&str> = report.split('\n').collect();
        if lines.len() < self.head + self.tail {
            return report.to_string();
        }
        format!(
            "{}\n\n...\n\n{}",
            lines[..self.head].join("\n"),
            lines[lines.len() - self.tail..].join("\n")
        )
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Idle,
    Finished(Job),
}

// ============================================================================
// 2. THE WORKER
// ============================================================================

pub struct Worker {
    id: String,
    store: Arc<JobStore>,
    root: WorkspaceRoot,
    engine: Arc<dyn SimulationEngine>,
    wait: Box<dyn WaitStrategy>,
    log_sink: Option<JobLogSink>,
    report_limit: ReportLimit,
}

impl Worker {
    pub fn new(store: Arc<JobStore>, root: WorkspaceRoot, engine: Arc<dyn SimulationEngine>) -> Self {
        let id = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "worker".to_string());
        Self {
            id,
            store,
            root,
            engine,
            wait: Box::new(FixedInterval::default()),
            log_sink: None,
            report_limit: ReportLimit::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_wait_strategy(mut self, wait: impl WaitStrategy + 'static) -> Self {
        self.wait = Box::new(wait);
        self
    }

    /// Tee log records into each job's `debug.log` while it runs.
    pub fn with_log_sink(mut self, sink: JobLogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_report_limit(mut self, limit: ReportLimit) -> Self {
        self.report_limit = limit;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Polls until `stop` is set. Errors of a single tick are logged and the
    /// loop keeps going.
    pub async fn run(&self, stop: Arc<AtomicBool>) -> Result<()> {
        let stuck = self.store.count_by_state(JobState::Running)?;
        if stuck > 0 {
            log::warn!(
                "{} job(s) left RUNNING by a previous worker; they will not be resumed",
                stuck
            );
        }
        log::info!("🛡️ Worker {} active. Polling queue...", self.id);

        while !stop.load(Ordering::SeqCst) {
            match self.tick().await {
                Ok(Tick::Finished(_)) => {}
                Ok(Tick::Idle) => self.wait.idle().await,
                Err(e) => {
                    log::error!("Worker tick failed: {:#}", e);
                    self.wait.idle().await;
                }
            }
        }

        log::info!("👋 Worker {} stopped.", self.id);
        Ok(())
    }

    /// One poll: executes the oldest queued job, if any, to a terminal state.
    pub async fn tick(&self) -> Result<Tick> {
        let Some(job) = self.store.next_queued()? else {
            return Ok(Tick::Idle);
        };
        Ok(Tick::Finished(self.execute(job).await?))
    }
}

// ============================================================================
// 3. THE EXECUTION LIFECYCLE
// ============================================================================

impl Worker {
    async fn execute(&self, job: Job) -> Result<Job> {
        self.store
            .set_state(job.id, JobState::Running, "")
            .with_context(|| format!("Failed to mark job {} as running", job.id))?;
        log::info!("✅ Job {} ({}) started", job.id, job.calculation_id);

        let workspace = self.root.workspace(&job.calculation_id);
        if let Ok(ws) = &workspace {
            self.mirror(ws, JobState::Running);
        }

        let phase = match &workspace {
            Ok(ws) => self.running_phase(ws).await,
            Err(e) => Err(anyhow!("{}", e)),
        };

        let (state, message) = match phase {
            Ok(outcome) => {
                let state = if outcome.success {
                    JobState::Success
                } else {
                    JobState::Failed
                };
                (state, self.report_limit.summarize(&outcome.report))
            }
            Err(e) => {
                log::error!("💥 Job {} raised: {:#}", job.id, e);
                (JobState::Error, format!("{:?}", e))
            }
        };

        let stored = self.store.set_state(job.id, state, &message);
        if let Ok(ws) = &workspace {
            self.mirror(ws, state);
        }
        if let Some(sink) = &self.log_sink {
            sink.detach();
        }
        stored.with_context(|| format!("Failed to record final state of job {}", job.id))?;

        log::info!("🏁 Job {} ({}) finished: {}", job.id, job.calculation_id, state);
        self.store
            .get(job.id)?
            .ok_or_else(|| anyhow!("Job {} vanished from the store", job.id))
    }

    /// Everything between RUNNING and the terminal state. Any error here,
    /// including an engine panic, ends the job as ERROR.
    async fn running_phase(&self, workspace: &Workspace) -> Result<EngineOutcome> {
        if let Some(sink) = &self.log_sink {
            workspace.ensure()?;
            sink.attach(&workspace.path().join(DEBUG_LOG))
                .context("Failed to open debug log")?;
        }

        let doc = workspace
            .read_configuration()
            .context("Failed to load calculation configuration")?;
        log::debug!("Summary:");
        log::debug!("Author: {}", doc.author.as_deref().unwrap_or("-"));
        log::debug!("Project: {}", doc.project.as_deref().unwrap_or("-"));
        log::debug!("Model Id: {}", doc.model_id.as_deref().unwrap_or("-"));
        log::debug!("Calculation Id: {}", doc.calculation_id);
        log::debug!("Type: {}", doc.model_type.as_deref().unwrap_or("-"));
        log::debug!("Version: {}", doc.version.as_deref().unwrap_or("-"));
        log::info!(
            "Running calculation for model-id '{}' with calculation-id '{}'",
            doc.model_id.as_deref().unwrap_or("-"),
            doc.calculation_id
        );

        let engine = self.engine.clone();
        let path = workspace.path().to_path_buf();
        let handle = tokio::spawn(async move { engine.run(&path).await });

        let outcome = match handle.await {
            Ok(result) => result.context("Simulation engine failed")?,
            Err(join) if join.is_panic() => {
                return Err(anyhow!(
                    "Simulation engine panicked: {}",
                    panic_message(join.into_panic().as_ref())
                ))
            }
            Err(join) => return Err(anyhow!("Simulation engine task cancelled: {}", join)),
        };

        log::debug!("Engine success: {}", outcome.success);
        Ok(outcome)
    }

    /// Best-effort: a failed marker write is logged, the store stays authoritative.
    fn mirror(&self, workspace: &Workspace, state: JobState) {
        if let Err(e) = workspace.write_marker(state) {
            log::warn!(
                "Failed to write state marker for {}: {:#}",
                workspace.calculation_id(),
                e
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
