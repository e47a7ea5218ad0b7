// src/results/budget.rs
//
// =============================================================================
// FLOWCALC: BUDGET READER (v 0.3 )
// =============================================================================
//
// Volumetric budget per recorded step, read from the engine's list file.
// Same three addressing schemes as the layered readers; no layers, no
// sentinels.

use super::gridfile::totim_matches;
use super::listfile::{parse_budgets, BudgetRecord, TimeUnit};
use super::{find_by_extension, BudgetSnapshot, ReadError};
use crate::core::TimeKey;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BudgetReader {
    workspace: PathBuf,
    time_unit: TimeUnit,
}

impl BudgetReader {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            time_unit: TimeUnit::default(),
        }
    }

    /// Column of the TIME SUMMARY used as totim.
    pub fn with_time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn try_records(&self) -> Result<Vec<BudgetRecord>, ReadError> {
        let path = find_by_extension(&self.workspace, "list")
            .ok_or_else(|| ReadError::ArtifactMissing("budget (*.list)".into()))?;
        let bytes = fs::read(&path)?;
        Ok(parse_budgets(&String::from_utf8_lossy(&bytes), self.time_unit))
    }

    fn records(&self) -> Vec<BudgetRecord> {
        self.try_records().unwrap_or_else(|e| {
            log::debug!("Budget read fell back to default: {}", e);
            Vec::new()
        })
    }

    pub fn times(&self) -> Vec<f64> {
        self.records().iter().map(|r| r.totim).collect()
    }

    pub fn kstpkper(&self) -> Vec<(usize, usize)> {
        self.records().iter().map(|r| r.kstpkper).collect()
    }

    pub fn index_count(&self) -> usize {
        self.records().len()
    }

    pub fn try_budget(&self, key: TimeKey, incremental: bool) -> Result<BudgetSnapshot, ReadError> {
        let records = self.try_records()?;
        let record = match key {
            TimeKey::Idx(idx) => records.get(idx),
            TimeKey::Totim(t) => records.iter().find(|r| totim_matches(r.totim, t)),
            TimeKey::Kstpkper(step, period) => {
                records.iter().find(|r| r.kstpkper == (step, period))
            }
        }
        .ok_or(ReadError::UnknownTime(key))?;

        Ok(if incremental {
            record.incremental.clone()
        } else {
            record.cumulative.clone()
        })
    }

    fn budget(&self, key: TimeKey, incremental: bool) -> BudgetSnapshot {
        self.try_budget(key, incremental).unwrap_or_else(|e| {
            log::debug!("Budget read fell back to default: {}", e);
            BudgetSnapshot::new()
        })
    }

    pub fn budget_by_totim(&self, totim: f64, incremental: bool) -> BudgetSnapshot {
        self.budget(TimeKey::Totim(totim), incremental)
    }

    pub fn budget_by_idx(&self, idx: usize, incremental: bool) -> BudgetSnapshot {
        self.budget(TimeKey::Idx(idx), incremental)
    }

    pub fn budget_by_kstpkper(&self, kstpkper: (usize, usize), incremental: bool) -> BudgetSnapshot {
        self.budget(TimeKey::Kstpkper(kstpkper.0, kstpkper.1), incremental)
    }

    /// Lenient lookup for an already-parsed key.
    pub fn budget_by_key(&self, key: TimeKey, incremental: bool) -> BudgetSnapshot {
        self.budget(key, incremental)
    }
}
