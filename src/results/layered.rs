// src/results/layered.rs
//
// =============================================================================
// FLOWCALC: LAYERED RESULT READERS (v 0.3 )
// =============================================================================
//
// Head, drawdown and concentration share one reader (`GridReader`) that
// differs only in artifact naming, record layout, text label and sentinel.
// Concentration is substance-indexed (one UCN file per substance); the other
// two have a single channel, substance 0.

use super::gridfile::{GridFile, HeaderLayout};
use super::{find_by_extension, LayerGrid, ReadError, Sentinel, TimeSeries};
use crate::core::{ResultKind, TimeKey};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
enum Locator {
    /// Single artifact found by extension.
    Extension(&'static str),
    /// `MT3D001.UCN`, `MT3D002.UCN`, ... one per substance.
    Substances,
}

fn substance_file_name(substance: usize) -> String {
    format!("MT3D{:03}.UCN", substance + 1)
}

fn is_substance_file(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.len() == 11
        && upper.starts_with("MT3D")
        && upper.ends_with(".UCN")
        && upper[4..7].chars().all(|c| c.is_ascii_digit())
}

fn lenient<T: Default>(what: &str, result: Result<T, ReadError>) -> T {
    result.unwrap_or_else(|e| {
        log::debug!("Result read ({}) fell back to default: {}", what, e);
        T::default()
    })
}

// ============================================================================
// 1. GRID READER
// ============================================================================

#[derive(Debug, Clone)]
pub struct GridReader {
    kind: ResultKind,
    workspace: PathBuf,
    locator: Locator,
    layout: HeaderLayout,
    text: &'static str,
    sentinel: Sentinel,
}

impl GridReader {
    pub fn head(workspace: &Path) -> Self {
        Self {
            kind: ResultKind::Head,
            workspace: workspace.to_path_buf(),
            locator: Locator::Extension("hds"),
            layout: HeaderLayout::Head,
            text: "HEAD",
            sentinel: Sentinel::Below(-999.0),
        }
    }

    pub fn drawdown(workspace: &Path) -> Self {
        Self {
            kind: ResultKind::Drawdown,
            workspace: workspace.to_path_buf(),
            locator: Locator::Extension("ddn"),
            layout: HeaderLayout::Head,
            text: "DRAWDOWN",
            sentinel: Sentinel::Below(-999.0),
        }
    }

    pub fn concentration(workspace: &Path) -> Self {
        Self {
            kind: ResultKind::Concentration,
            workspace: workspace.to_path_buf(),
            locator: Locator::Substances,
            layout: HeaderLayout::Ucn,
            text: "CONCENTRATION",
            sentinel: Sentinel::Above(1e29),
        }
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    /// Number of artifact channels present (substances for concentration).
    pub fn number_of_substances(&self) -> usize {
        match self.locator {
            Locator::Extension(ext) => find_by_extension(&self.workspace, ext).is_some() as usize,
            Locator::Substances => fs::read_dir(&self.workspace)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| e.path().is_file())
                        .filter(|e| is_substance_file(&e.file_name().to_string_lossy()))
                        .count()
                })
                .unwrap_or(0),
        }
    }

    fn locate(&self, substance: usize) -> Result<PathBuf, ReadError> {
        match self.locator {
            Locator::Extension(ext) => {
                if substance != 0 {
                    return Err(ReadError::SubstanceOutOfRange {
                        substance,
                        available: self.number_of_substances(),
                    });
                }
                find_by_extension(&self.workspace, ext)
                    .ok_or_else(|| ReadError::ArtifactMissing(format!("{} (*.{})", self.kind, ext)))
            }
            Locator::Substances => {
                let wanted = substance_file_name(substance);
                fs::read_dir(&self.workspace)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .find(|p| {
                        p.is_file()
                            && p.file_name()
                                .map(|n| n.to_string_lossy().eq_ignore_ascii_case(&wanted))
                                .unwrap_or(false)
                    })
                    .ok_or_else(|| ReadError::ArtifactMissing(wanted))
            }
        }
    }

    fn open(&self, substance: usize) -> Result<GridFile, ReadError> {
        GridFile::open(&self.locate(substance)?, self.layout, self.text)
    }

    // -------------------------------------------------------------------------
    // Strict API
    // -------------------------------------------------------------------------

    pub fn try_times(&self, substance: usize) -> Result<Vec<f64>, ReadError> {
        Ok(self.open(substance)?.times())
    }

    pub fn try_kstpkper(&self, substance: usize) -> Result<Vec<(usize, usize)>, ReadError> {
        Ok(self.open(substance)?.kstpkper())
    }

    pub fn try_number_of_layers(&self, substance: usize) -> Result<usize, ReadError> {
        Ok(self.open(substance)?.number_of_layers())
    }

    pub fn try_layer(
        &self,
        substance: usize,
        key: TimeKey,
        layer: usize,
    ) -> Result<LayerGrid, ReadError> {
        let grid = self.open(substance)?;
        let idx = grid.resolve(key)?;
        let raw = grid.read_layer(idx, layer)?;

        Ok(raw
            .into_iter()
            .map(|row| row.into_iter().map(|v| self.sentinel.normalize(v)).collect())
            .collect())
    }

    pub fn try_time_series(
        &self,
        substance: usize,
        layer: usize,
        row: usize,
        column: usize,
    ) -> Result<TimeSeries, ReadError> {
        let series = self
            .open(substance)?
            .read_cell_series(layer, row, column)?;
        Ok(series
            .into_iter()
            .map(|(totim, v)| (totim, v.and_then(|v| self.sentinel.normalize(v))))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Lenient API
    // -------------------------------------------------------------------------

    pub fn times(&self, substance: usize) -> Vec<f64> {
        lenient("times", self.try_times(substance))
    }

    pub fn index_count(&self, substance: usize) -> usize {
        self.times(substance).len()
    }

    /// Positions 0..n of the time index.
    pub fn idx(&self, substance: usize) -> Vec<usize> {
        (0..self.index_count(substance)).collect()
    }

    pub fn kstpkper(&self, substance: usize) -> Vec<(usize, usize)> {
        lenient("kstpkper", self.try_kstpkper(substance))
    }

    pub fn number_of_layers(&self, substance: usize) -> usize {
        lenient("layers", self.try_number_of_layers(substance))
    }

    pub fn layer(&self, substance: usize, key: TimeKey, layer: usize) -> LayerGrid {
        lenient("layer", self.try_layer(substance, key, layer))
    }

    pub fn time_series(
        &self,
        substance: usize,
        layer: usize,
        row: usize,
        column: usize,
    ) -> TimeSeries {
        lenient(
            "time series",
            self.try_time_series(substance, layer, row, column),
        )
    }
}

// ============================================================================
// 2. SINGLE-CHANNEL READERS (Head, Drawdown)
// ============================================================================

macro_rules! single_grid_reader {
    ($(#[$meta:meta])* $name:ident, $ctor:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(GridReader);

        impl $name {
            pub fn new(workspace: impl AsRef<Path>) -> Self {
                Self(GridReader::$ctor(workspace.as_ref()))
            }

            pub fn times(&self) -> Vec<f64> {
                self.0.times(0)
            }

            pub fn index_count(&self) -> usize {
                self.0.index_count(0)
            }

            pub fn kstpkper(&self) -> Vec<(usize, usize)> {
                self.0.kstpkper(0)
            }

            pub fn number_of_layers(&self) -> usize {
                self.0.number_of_layers(0)
            }

            pub fn layer_by_totim(&self, totim: f64, layer: usize) -> LayerGrid {
                self.0.layer(0, TimeKey::Totim(totim), layer)
            }

            pub fn layer_by_idx(&self, idx: usize, layer: usize) -> LayerGrid {
                self.0.layer(0, TimeKey::Idx(idx), layer)
            }

            pub fn layer_by_kstpkper(&self, kstpkper: (usize, usize), layer: usize) -> LayerGrid {
                self.0.layer(0, TimeKey::Kstpkper(kstpkper.0, kstpkper.1), layer)
            }

            pub fn time_series(&self, layer: usize, row: usize, column: usize) -> TimeSeries {
                self.0.time_series(0, layer, row, column)
            }

            pub fn try_times(&self) -> Result<Vec<f64>, ReadError> {
                self.0.try_times(0)
            }

            pub fn try_layer(&self, key: TimeKey, layer: usize) -> Result<LayerGrid, ReadError> {
                self.0.try_layer(0, key, layer)
            }
        }
    };
}

single_grid_reader!(
    /// Hydraulic head (`*.hds`).
    HeadReader,
    head
);

single_grid_reader!(
    /// Drawdown (`*.ddn`).
    DrawdownReader,
    drawdown
);

// ============================================================================
// 3. CONCENTRATION READER
// ============================================================================

/// Solute concentration, one `MT3D###.UCN` file per substance.
#[derive(Debug, Clone)]
pub struct ConcentrationReader(GridReader);

impl ConcentrationReader {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self(GridReader::concentration(workspace.as_ref()))
    }

    pub fn number_of_substances(&self) -> usize {
        self.0.number_of_substances()
    }

    pub fn times(&self, substance: usize) -> Vec<f64> {
        self.0.times(substance)
    }

    pub fn index_count(&self, substance: usize) -> usize {
        self.0.index_count(substance)
    }

    pub fn kstpkper(&self, substance: usize) -> Vec<(usize, usize)> {
        self.0.kstpkper(substance)
    }

    pub fn number_of_layers(&self, substance: usize) -> usize {
        self.0.number_of_layers(substance)
    }

    pub fn layer_by_totim(&self, substance: usize, totim: f64, layer: usize) -> LayerGrid {
        self.0.layer(substance, TimeKey::Totim(totim), layer)
    }

    pub fn layer_by_idx(&self, substance: usize, idx: usize, layer: usize) -> LayerGrid {
        self.0.layer(substance, TimeKey::Idx(idx), layer)
    }

    pub fn layer_by_kstpkper(
        &self,
        substance: usize,
        kstpkper: (usize, usize),
        layer: usize,
    ) -> LayerGrid {
        self.0
            .layer(substance, TimeKey::Kstpkper(kstpkper.0, kstpkper.1), layer)
    }

    pub fn time_series(
        &self,
        substance: usize,
        layer: usize,
        row: usize,
        column: usize,
    ) -> TimeSeries {
        self.0.time_series(substance, layer, row, column)
    }

    pub fn try_layer(
        &self,
        substance: usize,
        key: TimeKey,
        layer: usize,
    ) -> Result<LayerGrid, ReadError> {
        self.0.try_layer(substance, key, layer)
    }
}
