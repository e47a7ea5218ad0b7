// src/details.rs
//
// =============================================================================
// FLOWCALC: DETAILS CACHE (v 0.3 )
// =============================================================================
//
// The per-calculation summary shown before any result is fetched: state,
// message, files, and the time index of every result type.
//
// Responsibilities:
// 1. Resolve the effective state (workspace marker first, then the store).
// 2. Non-success jobs get a degraded descriptor built without touching any
//    result artifact. It is never persisted.
// 3. Successful jobs get the full descriptor, computed once and persisted as
//    `details` with exclusive-create semantics. Concurrent writers produce
//    byte-identical content, so losing the race is harmless.

use crate::core::{CalculationDocument, Job, JobState, ResultKind};
use crate::results::{ReadOptions, ReaderRegistry, TimeUnit};
use crate::workspace::{Workspace, DETAILS_FILE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

// ============================================================================
// 1. DESCRIPTOR
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindTimes {
    pub idx: Vec<usize>,
    pub total_times: Vec<f64>,
    pub kstpkper: Vec<(usize, usize)>,
    pub layers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetTimes {
    pub idx: Vec<usize>,
    pub total_times: Vec<f64>,
    pub kstpkper: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSummary {
    pub start_date_time: Option<String>,
    pub time_unit: Option<i64>,
    /// Head time index; the global time axis of the calculation.
    pub total_times: Vec<f64>,
    pub head: KindTimes,
    pub budget: BudgetTimes,
    pub concentration: KindTimes,
    pub drawdown: KindTimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Details {
    pub calculation_id: String,
    /// Numeric job state code.
    pub state: i64,
    pub message: String,
    pub files: Vec<String>,
    pub times: TimeSummary,
    /// Per layer, the result types that have data for it.
    pub layer_values: Vec<Vec<ResultKind>>,
}

impl Details {
    pub fn job_state(&self) -> Option<JobState> {
        JobState::from_code(self.state)
    }
}

// ============================================================================
// 2. CACHE
// ============================================================================

#[derive(Default)]
pub struct DetailsCache {
    registry: ReaderRegistry,
}

impl DetailsCache {
    pub fn new(registry: ReaderRegistry) -> Self {
        Self { registry }
    }

    /// `None` when neither the marker nor the store knows the calculation.
    pub fn get(&self, workspace: &Workspace, job: Option<&Job>) -> Result<Option<Details>> {
        let state = match workspace.read_marker().or(job.map(|j| j.state)) {
            Some(state) => state,
            None => return Ok(None),
        };
        let message = job.map(|j| j.message.clone()).unwrap_or_default();

        if state != JobState::Success {
            return Ok(Some(Self::degraded(workspace, state, message)));
        }

        if let Some(cached) = Self::load(workspace) {
            return Ok(Some(cached));
        }

        let details = self.compute(workspace, message);
        let bytes = serde_json::to_vec_pretty(&details)?;
        if workspace.create_exclusive(DETAILS_FILE, &bytes)? {
            log::debug!("Persisted details for {}", workspace.calculation_id());
        } else {
            log::debug!(
                "Details for {} already persisted by another reader",
                workspace.calculation_id()
            );
        }
        Ok(Some(details))
    }

    fn load(workspace: &Workspace) -> Option<Details> {
        let bytes = fs::read(workspace.path().join(DETAILS_FILE)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(details) => Some(details),
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable details cache of {}: {}",
                    workspace.calculation_id(),
                    e
                );
                None
            }
        }
    }

    fn degraded(workspace: &Workspace, state: JobState, message: String) -> Details {
        Details {
            calculation_id: workspace.calculation_id().to_string(),
            state: state.code(),
            message: workspace.engine_log().unwrap_or(message),
            files: workspace.files(),
            times: TimeSummary::default(),
            layer_values: Vec::new(),
        }
    }

    fn compute(&self, workspace: &Workspace, message: String) -> Details {
        let config: Option<CalculationDocument> = match workspace.read_configuration() {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::warn!("Details without configuration: {:#}", e);
                None
            }
        };
        let time_unit_code = config.as_ref().and_then(|c| c.time_unit_code());
        let opts = ReadOptions {
            time_unit: time_unit_code
                .map(TimeUnit::from_itmuni)
                .unwrap_or_default(),
        };

        let path = workspace.path();
        let layered = |kind: ResultKind| -> KindTimes {
            match self.registry.layered(kind, path) {
                Some(reader) => KindTimes {
                    idx: reader.idx(0),
                    total_times: whole_times(reader.times(0)),
                    kstpkper: reader.kstpkper(0),
                    layers: reader.number_of_layers(0),
                },
                None => KindTimes::default(),
            }
        };

        let total_times = self
            .registry
            .layered(ResultKind::Head, path)
            .map(|reader| reader.times(0))
            .unwrap_or_default();
        let head = layered(ResultKind::Head);
        let drawdown = layered(ResultKind::Drawdown);
        let concentration = layered(ResultKind::Concentration);
        let budget = self
            .registry
            .budget(path, &opts)
            .map(|reader| {
                let total_times = reader.times();
                BudgetTimes {
                    idx: (0..total_times.len()).collect(),
                    kstpkper: reader.kstpkper(),
                    total_times: whole_times(total_times),
                }
            })
            .unwrap_or_default();

        let number_of_layers = config
            .as_ref()
            .and_then(|c| c.layer_count())
            .unwrap_or(head.layers);
        let layer_values = (0..number_of_layers)
            .map(|layer| {
                let mut kinds = Vec::new();
                if layer < head.layers {
                    kinds.push(ResultKind::Head);
                }
                if !budget.total_times.is_empty() {
                    kinds.push(ResultKind::Budget);
                }
                if layer < concentration.layers {
                    kinds.push(ResultKind::Concentration);
                }
                if layer < drawdown.layers {
                    kinds.push(ResultKind::Drawdown);
                }
                kinds
            })
            .collect();

        Details {
            calculation_id: workspace.calculation_id().to_string(),
            state: JobState::Success.code(),
            message,
            files: workspace.files(),
            times: TimeSummary {
                start_date_time: config.as_ref().and_then(|c| c.start_date_time()),
                time_unit: time_unit_code,
                total_times,
                head,
                budget,
                concentration,
                drawdown,
            },
            layer_values,
        }
    }
}

/// Per-type time axes are reported in whole time units, ties to even.
fn whole_times(times: Vec<f64>) -> Vec<f64> {
    times.into_iter().map(f64::round_ties_even).collect()
}
