// src/core.rs
//
// =============================================================================
// FLOWCALC: CORE SCHEMA AUTHORITY (v 0.3 )
// =============================================================================
//
// The shared vocabulary of the queue and the result index.
// This file defines the data contracts between the ingestion side, the
// worker, the simulation engine and the query surface.
//
// Design Principles:
// 1. Numeric state codes are part of the persisted contract (0/100/200/400/500).
// 2. Result types are a closed tagged enum, never free strings past the edge.
// 3. Three addressing schemes (totim, idx, kstpkper) share one key type.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// 1. JOB STATE (The Lifecycle)
// ============================================================================

/// Execution state of a calculation job.
///
/// The discriminants are persisted in the store and mirrored into the
/// workspace `state` marker, so they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Queued,
        JobState::Running,
        JobState::Success,
        JobState::Failed,
        JobState::Error,
    ];

    pub fn code(self) -> i64 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 100,
            JobState::Success => 200,
            JobState::Failed => 400,
            JobState::Error => 500,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(JobState::Queued),
            100 => Some(JobState::Running),
            200 => Some(JobState::Success),
            400 => Some(JobState::Failed),
            500 => Some(JobState::Error),
            _ => None,
        }
    }

    /// Queued or running. At most one active job exists per calculation id.
    pub fn is_active(self) -> bool {
        self.code() < JobState::Success.code()
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// States a job must currently be in for a move into `self` to be legal.
    pub fn predecessors(self) -> &'static [JobState] {
        match self {
            JobState::Queued => &[],
            JobState::Running => &[JobState::Queued],
            JobState::Success | JobState::Failed | JobState::Error => &[JobState::Running],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
            JobState::Error => "error",
        }
    }
}

impl From<JobState> for i64 {
    fn from(state: JobState) -> i64 {
        state.code()
    }
}

impl TryFrom<i64> for JobState {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, String> {
        JobState::from_code(code).ok_or_else(|| format!("unknown job state code {}", code))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

// ============================================================================
// 2. JOB RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub calculation_id: String,
    pub state: JobState,
    /// Engine report (possibly summarized) or the captured error chain.
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an idempotent enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted { id: i64 },
    /// An active job already exists for this calculation id.
    Skipped,
}

// ============================================================================
// 3. RESULT TYPES & ADDRESSING
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum KeyError {
    #[error("unknown result type '{0}' (expected head, drawdown, concentration or budget)")]
    UnknownKind(String),

    #[error("unknown addressing mode '{0}' (expected totim, idx or kstpkper)")]
    UnknownAddressing(String),

    #[error("invalid {mode} key '{raw}'")]
    InvalidKey { mode: &'static str, raw: String },

    #[error("unknown budget mode '{0}' (expected cumulative or incremental)")]
    UnknownBudgetMode(String),
}

/// The engine artifacts the result index knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Head,
    Drawdown,
    Concentration,
    Budget,
}

impl ResultKind {
    pub const ALL: [ResultKind; 4] = [
        ResultKind::Head,
        ResultKind::Drawdown,
        ResultKind::Concentration,
        ResultKind::Budget,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Head => "head",
            ResultKind::Drawdown => "drawdown",
            ResultKind::Concentration => "concentration",
            ResultKind::Budget => "budget",
        }
    }

    /// Budget is model-wide; every other kind has a layer dimension.
    pub fn is_layered(self) -> bool {
        !matches!(self, ResultKind::Budget)
    }
}

impl FromStr for ResultKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" | "heads" => Ok(ResultKind::Head),
            "drawdown" | "drawdowns" => Ok(ResultKind::Drawdown),
            "concentration" | "concentrations" => Ok(ResultKind::Concentration),
            "budget" | "budgets" => Ok(ResultKind::Budget),
            _ => Err(KeyError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Totim,
    Idx,
    Kstpkper,
}

impl FromStr for Addressing {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "totim" | "totims" => Ok(Addressing::Totim),
            "idx" => Ok(Addressing::Idx),
            "kstpkper" => Ok(Addressing::Kstpkper),
            _ => Err(KeyError::UnknownAddressing(s.to_string())),
        }
    }
}

/// One recorded output step, addressed by any of the three schemes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeKey {
    Totim(f64),
    Idx(usize),
    /// Zero-based (time step, stress period).
    Kstpkper(usize, usize),
}

impl TimeKey {
    /// Parses a raw key for the given addressing mode.
    /// `kstpkper` accepts `step,period` (also `step:period`).
    pub fn parse(addressing: Addressing, raw: &str) -> Result<Self, KeyError> {
        let raw_trim = raw.trim();
        match addressing {
            Addressing::Totim => raw_trim
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .map(TimeKey::Totim)
                .ok_or_else(|| KeyError::InvalidKey {
                    mode: "totim",
                    raw: raw.to_string(),
                }),
            Addressing::Idx => raw_trim
                .parse::<usize>()
                .map(TimeKey::Idx)
                .map_err(|_| KeyError::InvalidKey {
                    mode: "idx",
                    raw: raw.to_string(),
                }),
            Addressing::Kstpkper => {
                let invalid = || KeyError::InvalidKey {
                    mode: "kstpkper",
                    raw: raw.to_string(),
                };
                let (step, period) = raw_trim
                    .split_once(',')
                    .or_else(|| raw_trim.split_once(':'))
                    .ok_or_else(invalid)?;
                let step = step.trim().parse::<usize>().map_err(|_| invalid())?;
                let period = period.trim().parse::<usize>().map_err(|_| invalid())?;
                Ok(TimeKey::Kstpkper(step, period))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    Cumulative,
    Incremental,
}

impl BudgetMode {
    pub fn is_incremental(self) -> bool {
        matches!(self, BudgetMode::Incremental)
    }
}

impl FromStr for BudgetMode {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cumulative" => Ok(BudgetMode::Cumulative),
            "incremental" => Ok(BudgetMode::Incremental),
            _ => Err(KeyError::UnknownBudgetMode(s.to_string())),
        }
    }
}

// ============================================================================
// 4. CONFIGURATION DOCUMENT (The Blueprint)
// ============================================================================

/// The declarative calculation document written into each workspace.
/// Only the envelope is typed; `data` is handed to the engine untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationDocument {
    pub calculation_id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default, rename = "type")]
    pub model_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl CalculationDocument {
    /// Reads a JSON or YAML document; the extension decides, JSON otherwise.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let doc = if is_yaml {
            serde_yaml::from_str(&text).context("Invalid YAML configuration")?
        } else {
            serde_json::from_str(&text).context("Invalid JSON configuration")?
        };
        Ok(doc)
    }

    /// MODFLOW discretization block (`data.mf.dis`).
    fn discretization(&self) -> Option<&Value> {
        self.data.get("mf")?.get("dis")
    }

    pub fn layer_count(&self) -> Option<usize> {
        self.discretization()?
            .get("nlay")?
            .as_u64()
            .map(|n| n as usize)
    }

    /// MODFLOW ITMUNI code (0 undefined, 1 s, 2 min, 3 h, 4 d, 5 y).
    pub fn time_unit_code(&self) -> Option<i64> {
        self.discretization()?.get("itmuni")?.as_i64()
    }

    pub fn start_date_time(&self) -> Option<String> {
        self.discretization()?
            .get("start_datetime")?
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_are_stable() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_code(state.code()), Some(state));
        }
        assert_eq!(serde_json::to_string(&JobState::Error).unwrap(), "500");
        assert!(JobState::Running.is_active());
        assert!(JobState::Failed.is_terminal());
        assert_eq!(JobState::from_code(300), None);
    }

    #[test]
    fn time_keys_parse_per_mode() {
        assert_eq!(TimeKey::parse(Addressing::Totim, "31.5"), Ok(TimeKey::Totim(31.5)));
        assert_eq!(TimeKey::parse(Addressing::Idx, " 2 "), Ok(TimeKey::Idx(2)));
        assert_eq!(TimeKey::parse(Addressing::Kstpkper, "0,3"), Ok(TimeKey::Kstpkper(0, 3)));
        assert_eq!(TimeKey::parse(Addressing::Kstpkper, "1:2"), Ok(TimeKey::Kstpkper(1, 2)));
        assert!(TimeKey::parse(Addressing::Idx, "-1").is_err());
        assert!(TimeKey::parse(Addressing::Totim, "NaN").is_err());
        assert!(TimeKey::parse(Addressing::Kstpkper, "3").is_err());
    }

    #[test]
    fn result_kinds_accept_plurals() {
        assert_eq!("Heads".parse::<ResultKind>(), Ok(ResultKind::Head));
        assert_eq!("budget".parse::<ResultKind>(), Ok(ResultKind::Budget));
        assert!("pressure".parse::<ResultKind>().is_err());
        assert_eq!("incremental".parse::<BudgetMode>(), Ok(BudgetMode::Incremental));
    }
}
