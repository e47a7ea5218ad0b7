// src/results/observations.rs
//
// =============================================================================
// FLOWCALC: HEAD OBSERVATIONS (v 0.3 )
// =============================================================================
//
// Simulated vs. observed heads from the HOB package output (`*.hob.out`):
//
//    "SIMULATED EQUIVALENT"   "OBSERVED VALUE"    "OBSERVATION NAME"
//      35.8935432434082        36.0000000000000       HOB_1
//
// The first line is a column header. Every other non-blank line is one
// observation.

use super::ReadError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const HOB_OUT: &str = "mf.hob.out";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub simulated: f64,
    pub observed: f64,
    pub name: String,
}

pub fn parse_observations(text: &str, path: &Path) -> Result<Vec<Observation>, ReadError> {
    let malformed = |line_no: usize, reason: &str| ReadError::Malformed {
        path: path.to_path_buf(),
        reason: format!("line {}: {}", line_no, reason),
    };

    text.lines()
        .enumerate()
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut fields = line.split_whitespace();
            let mut number = |what: &str| -> Result<f64, ReadError> {
                fields
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                    .ok_or_else(|| malformed(i + 1, &format!("bad {} value", what)))
            };
            let simulated = number("simulated")?;
            let observed = number("observed")?;
            let name = fields
                .next()
                .ok_or_else(|| malformed(i + 1, "missing observation name"))?;
            Ok(Observation {
                simulated,
                observed,
                name: name.trim_matches('"').to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ObservationReader {
    workspace: PathBuf,
}

impl ObservationReader {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.workspace.join(HOB_OUT)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    pub fn try_observations(&self) -> Result<Vec<Observation>, ReadError> {
        let path = self.path();
        if !path.is_file() {
            return Err(ReadError::ArtifactMissing(format!("head observations ({})", HOB_OUT)));
        }
        let bytes = fs::read(&path)?;
        parse_observations(&String::from_utf8_lossy(&bytes), &path)
    }
}
