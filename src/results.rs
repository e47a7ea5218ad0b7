// src/results.rs
//
// =============================================================================
// FLOWCALC: RESULT INDEX (v 0.3 )
// =============================================================================
//
// Typed readers over the engine's output artifacts.
//
// Responsibilities:
// 1. Locate each artifact in a workspace by filename convention.
// 2. Expose one time index under three keys (totim, idx, kstpkper).
// 3. Normalize cell values: round to 2 decimals, sentinels become `None`.
// 4. Stay lenient: every accessor has a `try_*` twin returning `ReadError`;
//    the plain accessor collapses any error to an empty/zero default, so a
//    queued or running job reads as "no data yet" instead of failing.

use crate::core::{ResultKind, TimeKey};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub mod budget;
pub mod gridfile;
pub mod layered;
pub mod listfile;
pub mod observations;

pub use budget::BudgetReader;
pub use layered::{ConcentrationReader, DrawdownReader, GridReader, HeadReader};
pub use listfile::TimeUnit;
pub use observations::{Observation, ObservationReader};

// ============================================================================
// 1. VALUE SHAPES
// ============================================================================

/// Row-major grid of one layer; `None` marks a no-data cell.
pub type LayerGrid = Vec<Vec<Option<f64>>>;

/// `(totim, value)` for one cell across the time index.
pub type TimeSeries = Vec<(f64, Option<f64>)>;

/// Budget term name → value.
pub type BudgetSnapshot = BTreeMap<String, f64>;

// ============================================================================
// 2. ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no {0} artifact in workspace")]
    ArtifactMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed artifact {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("time key {0:?} not in the time index")]
    UnknownTime(TimeKey),

    #[error("layer {layer} not available")]
    LayerOutOfRange { layer: usize },

    #[error("cell ({row}, {column}) outside the {nrow}x{ncol} grid")]
    CellOutOfRange {
        row: usize,
        column: usize,
        nrow: usize,
        ncol: usize,
    },

    #[error("substance {substance} not available ({available} substances)")]
    SubstanceOutOfRange { substance: usize, available: usize },
}

// ============================================================================
// 3. SENTINEL POLICY
// ============================================================================

/// Engine "no data" marker for a result type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sentinel {
    /// Values strictly below the threshold are missing (heads: -999).
    Below(f64),
    /// Values strictly above the threshold are missing (concentration: 1e29).
    Above(f64),
}

impl Sentinel {
    /// Rounds to 2 decimals, then applies the threshold.
    pub fn normalize(self, raw: f64) -> Option<f64> {
        let value = round2(raw);
        if !value.is_finite() {
            return None;
        }
        let missing = match self {
            Sentinel::Below(t) => value < t,
            Sentinel::Above(t) => value > t,
        };
        (!missing).then_some(value)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// 4. ARTIFACT DISCOVERY
// ============================================================================

/// First file (by sorted name) with the given extension, case-insensitive.
pub(crate) fn find_by_extension(workspace: &Path, extension: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(workspace)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case(extension))
                    .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

// ============================================================================
// 5. READER REGISTRY
// ============================================================================

/// Options a reader may need beyond the workspace path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub time_unit: TimeUnit,
}

enum Reader {
    Layered(GridReader),
    Budget(BudgetReader),
}

type Constructor = fn(&Path, &ReadOptions) -> Reader;

/// Maps each result type to its reader constructor. Built once, then used
/// for every lookup instead of branching on type names at call sites.
#[derive(Clone)]
pub struct ReaderRegistry {
    constructors: HashMap<ResultKind, Constructor>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        let mut constructors: HashMap<ResultKind, Constructor> = HashMap::new();
        constructors.insert(ResultKind::Head, |ws: &Path, _: &ReadOptions| {
            Reader::Layered(GridReader::head(ws))
        });
        constructors.insert(ResultKind::Drawdown, |ws: &Path, _: &ReadOptions| {
            Reader::Layered(GridReader::drawdown(ws))
        });
        constructors.insert(ResultKind::Concentration, |ws: &Path, _: &ReadOptions| {
            Reader::Layered(GridReader::concentration(ws))
        });
        constructors.insert(ResultKind::Budget, |ws: &Path, opts: &ReadOptions| {
            Reader::Budget(BudgetReader::new(ws).with_time_unit(opts.time_unit))
        });
        Self { constructors }
    }
}

impl ReaderRegistry {
    fn open(&self, kind: ResultKind, workspace: &Path, opts: &ReadOptions) -> Option<Reader> {
        self.constructors.get(&kind).map(|ctor| ctor(workspace, opts))
    }

    /// Layered reader for `kind`; `None` for budget.
    pub fn layered(&self, kind: ResultKind, workspace: &Path) -> Option<GridReader> {
        match self.open(kind, workspace, &ReadOptions::default())? {
            Reader::Layered(reader) => Some(reader),
            Reader::Budget(_) => None,
        }
    }

    pub fn budget(&self, workspace: &Path, opts: &ReadOptions) -> Option<BudgetReader> {
        match self.open(ResultKind::Budget, workspace, opts)? {
            Reader::Budget(reader) => Some(reader),
            Reader::Layered(_) => None,
        }
    }
}
