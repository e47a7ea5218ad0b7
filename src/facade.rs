// src/facade.rs
//
// =============================================================================
// FLOWCALC: QUERY FACADE (v 0.3 )
// =============================================================================
//
// The read surface handed to an outer layer (the CLI here).
//
// Responsibilities:
// 1. Parse edge strings (result type, addressing mode, key, budget mode) into
//    typed keys; malformed input is the only error a result query returns.
// 2. Route to the right reader through the registry.
// 3. Keep the lenient contract: an unfinished or failed calculation reads
//    as empty data, never as an error.

use crate::core::{Addressing, BudgetMode, Job, JobState, ResultKind, TimeKey};
use crate::details::{Details, DetailsCache};
use crate::jobstore::JobStore;
use crate::results::observations::HOB_OUT;
use crate::results::{
    BudgetSnapshot, LayerGrid, Observation, ObservationReader, ReadError, ReadOptions,
    ReaderRegistry, TimeSeries, TimeUnit,
};
use crate::workspace::{FileContent, Workspace, WorkspaceError, WorkspaceRoot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error("calculation '{0}' not found")]
    NotFound(String),

    #[error("file '{file}' not found in calculation '{calculation_id}'")]
    FileNotFound {
        calculation_id: String,
        file: String,
    },

    #[error("{0} results have no layers")]
    NotLayered(ResultKind),

    #[error(transparent)]
    Key(#[from] crate::core::KeyError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Status record of the current job of a calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub calculation_id: String,
    pub state: JobState,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
    pub error: u64,
}

pub struct QueryFacade {
    store: Arc<JobStore>,
    root: WorkspaceRoot,
    registry: ReaderRegistry,
    details: DetailsCache,
}

impl QueryFacade {
    pub fn new(store: Arc<JobStore>, root: WorkspaceRoot) -> Self {
        let registry = ReaderRegistry::default();
        Self {
            store,
            root,
            details: DetailsCache::new(registry.clone()),
            registry,
        }
    }

    fn workspace(&self, calculation_id: &str) -> Result<Workspace, FacadeError> {
        Ok(self.root.workspace(calculation_id)?)
    }

    /// Store row of the calculation. An unreadable store is tolerated while
    /// the workspace marker can still answer.
    fn latest_job(&self, workspace: &Workspace) -> Result<Option<Job>, FacadeError> {
        match self.store.latest_for(workspace.calculation_id()) {
            Ok(job) => Ok(job),
            Err(e) if workspace.read_marker().is_some() => {
                log::warn!(
                    "⚠️ Job store unreadable, answering {} from its marker: {:#}",
                    workspace.calculation_id(),
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Job Queries
    // -------------------------------------------------------------------------

    /// The marker wins over the store, so a status read never depends on
    /// the worker having committed its last row update.
    pub fn get_job_status(&self, calculation_id: &str) -> Result<JobStatus, FacadeError> {
        let workspace = self.workspace(calculation_id)?;
        let job = self.latest_job(&workspace)?;
        let state = workspace
            .read_marker()
            .or(job.as_ref().map(|j| j.state))
            .ok_or_else(|| FacadeError::NotFound(calculation_id.to_string()))?;

        Ok(JobStatus {
            calculation_id: calculation_id.to_string(),
            state,
            message: job.as_ref().map(|j| j.message.clone()).unwrap_or_default(),
            created_at: job.as_ref().map(|j| j.created_at),
            updated_at: job.as_ref().map(|j| j.updated_at),
        })
    }

    pub fn get_details(&self, calculation_id: &str) -> Result<Details, FacadeError> {
        let workspace = self.workspace(calculation_id)?;
        let job = self.latest_job(&workspace)?;
        self.details
            .get(&workspace, job.as_ref())?
            .ok_or_else(|| FacadeError::NotFound(calculation_id.to_string()))
    }

    pub fn queue_stats(&self) -> Result<QueueStats, FacadeError> {
        Ok(QueueStats {
            queued: self.store.count_by_state(JobState::Queued)?,
            running: self.store.count_by_state(JobState::Running)?,
            success: self.store.count_by_state(JobState::Success)?,
            failed: self.store.count_by_state(JobState::Failed)?,
            error: self.store.count_by_state(JobState::Error)?,
        })
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, FacadeError> {
        Ok(self.store.list(limit)?)
    }

    // -------------------------------------------------------------------------
    // Result Queries
    // -------------------------------------------------------------------------

    pub fn get_layer(
        &self,
        calculation_id: &str,
        kind: &str,
        addressing: &str,
        key: &str,
        layer: usize,
        substance: usize,
    ) -> Result<LayerGrid, FacadeError> {
        let kind: ResultKind = kind.parse()?;
        let key = TimeKey::parse(addressing.parse::<Addressing>()?, key)?;
        let workspace = self.workspace(calculation_id)?;

        let reader = self
            .registry
            .layered(kind, workspace.path())
            .ok_or(FacadeError::NotLayered(kind))?;
        Ok(reader.layer(substance, key, layer))
    }

    pub fn get_time_series(
        &self,
        calculation_id: &str,
        kind: &str,
        layer: usize,
        row: usize,
        column: usize,
        substance: usize,
    ) -> Result<TimeSeries, FacadeError> {
        let kind: ResultKind = kind.parse()?;
        let workspace = self.workspace(calculation_id)?;

        let reader = self
            .registry
            .layered(kind, workspace.path())
            .ok_or(FacadeError::NotLayered(kind))?;
        Ok(reader.time_series(substance, layer, row, column))
    }

    pub fn get_budget(
        &self,
        calculation_id: &str,
        addressing: &str,
        key: &str,
        mode: &str,
    ) -> Result<BudgetSnapshot, FacadeError> {
        let key = TimeKey::parse(addressing.parse::<Addressing>()?, key)?;
        let mode: BudgetMode = mode.parse()?;
        let workspace = self.workspace(calculation_id)?;

        let opts = ReadOptions {
            time_unit: Self::time_unit(&workspace),
        };
        Ok(self
            .registry
            .budget(workspace.path(), &opts)
            .map(|reader| reader.budget_by_key(key, mode.is_incremental()))
            .unwrap_or_default())
    }

    /// Head observations. Unlike grid queries this is strict: a missing
    /// output is `FileNotFound`, an unparsable one an error.
    pub fn get_observations(&self, calculation_id: &str) -> Result<Vec<Observation>, FacadeError> {
        let workspace = self.workspace(calculation_id)?;
        if !workspace.exists() {
            return Err(FacadeError::NotFound(calculation_id.to_string()));
        }
        let reader = ObservationReader::new(workspace.path());
        if !reader.exists() {
            return Err(FacadeError::FileNotFound {
                calculation_id: calculation_id.to_string(),
                file: HOB_OUT.to_string(),
            });
        }
        Ok(reader.try_observations()?)
    }

    fn time_unit(workspace: &Workspace) -> TimeUnit {
        workspace
            .read_configuration()
            .ok()
            .and_then(|doc| doc.time_unit_code())
            .map(TimeUnit::from_itmuni)
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Workspace Files
    // -------------------------------------------------------------------------

    pub fn list_files(&self, calculation_id: &str) -> Result<Vec<String>, FacadeError> {
        let workspace = self.workspace(calculation_id)?;
        if !workspace.exists() {
            return Err(FacadeError::NotFound(calculation_id.to_string()));
        }
        Ok(workspace.files())
    }

    pub fn read_file(&self, calculation_id: &str, name: &str) -> Result<FileContent, FacadeError> {
        let files = self.list_files(calculation_id)?;
        if !files.iter().any(|f| f == name) {
            return Err(FacadeError::FileNotFound {
                calculation_id: calculation_id.to_string(),
                file: name.to_string(),
            });
        }
        Ok(self.workspace(calculation_id)?.read_file(name)?)
    }

    /// Removes engine outputs so the calculation can be resubmitted.
    pub fn cleanup(&self, calculation_id: &str) -> Result<Vec<String>, FacadeError> {
        let workspace = self.workspace(calculation_id)?;
        if !workspace.exists() {
            return Err(FacadeError::NotFound(calculation_id.to_string()));
        }
        if let Some(job) = self.store.latest_for(calculation_id)? {
            if job.state.is_active() {
                log::warn!(
                    "Cleaning up {} while its job is {}",
                    calculation_id,
                    job.state
                );
            }
        }
        let removed = workspace.cleanup()?;
        log::info!("Cleaned up {}: {} files removed", calculation_id, removed.len());
        Ok(removed)
    }
}
