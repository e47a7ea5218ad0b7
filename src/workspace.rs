// src/workspace.rs
//
// =============================================================================
// FLOWCALC: WORKSPACE LAYOUT (v 0.3 )
// =============================================================================
//
// One durable directory per calculation id.
//
// Ownership:
// - Ingestion writes `configuration.json` (or `.yaml`).
// - The engine writes binary artifacts and `engine.log`.
// - The worker writes the `state` marker and `debug.log`.
// - The details cache writes `details` exactly once.
//
// Writes go through a temp file in the same directory followed by a rename
// (or a hard link for exclusive creates), so readers never see partial
// marker or cache files.

use crate::core::{CalculationDocument, JobState};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CONFIGURATION_JSON: &str = "configuration.json";
pub const CONFIGURATION_YAML: &str = "configuration.yaml";
pub const STATE_FILE: &str = "state";
pub const DETAILS_FILE: &str = "details";
pub const ENGINE_LOG: &str = "engine.log";
pub const DEBUG_LOG: &str = "debug.log";

const TEMP_PREFIX: &str = ".tmp-";
const MAX_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WorkspaceError {
    #[error("invalid calculation id '{0}'")]
    InvalidCalculationId(String),

    #[error("invalid file name '{0}'")]
    InvalidFileName(String),
}

/// Calculation ids become directory names, so they must be a single safe
/// path component.
pub fn validate_calculation_id(id: &str) -> Result<(), WorkspaceError> {
    if is_safe_component(id) && id.len() <= MAX_ID_LEN {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidCalculationId(id.to_string()))
    }
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ============================================================================
// 1. WORKSPACE ROOT
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace root {:?}", root))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self, calculation_id: &str) -> Result<Workspace, WorkspaceError> {
        validate_calculation_id(calculation_id)?;
        Ok(Workspace {
            calculation_id: calculation_id.to_string(),
            path: self.root.join(calculation_id),
        })
    }
}

// ============================================================================
// 2. WORKSPACE
// ============================================================================

/// Text view of a workspace file. Binary files get a notice instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileContent {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    calculation_id: String,
    path: PathBuf,
}

impl Workspace {
    pub fn calculation_id(&self) -> &str {
        &self.calculation_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("Failed to create workspace {:?}", self.path))
    }

    /// Removes everything in the workspace and recreates it empty.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Failed to clear workspace {:?}", self.path))?;
        }
        self.ensure()
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn configuration_path(&self) -> Option<PathBuf> {
        [CONFIGURATION_JSON, CONFIGURATION_YAML, "configuration.yml"]
            .iter()
            .map(|name| self.path.join(name))
            .find(|p| p.is_file())
    }

    pub fn read_configuration(&self) -> Result<CalculationDocument> {
        let path = self
            .configuration_path()
            .ok_or_else(|| anyhow!("No configuration document in {:?}", self.path))?;
        CalculationDocument::load(&path)
    }

    pub fn write_configuration(&self, doc: &CalculationDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.write_atomic(CONFIGURATION_JSON, &bytes)
    }

    // -------------------------------------------------------------------------
    // State Marker
    // -------------------------------------------------------------------------

    /// State mirrored by the worker. `None` if absent or unreadable.
    pub fn read_marker(&self) -> Option<JobState> {
        let text = fs::read_to_string(self.path.join(STATE_FILE)).ok()?;
        let code = text.trim().parse::<i64>().ok()?;
        JobState::from_code(code)
    }

    pub fn write_marker(&self, state: JobState) -> Result<()> {
        self.write_atomic(STATE_FILE, state.code().to_string().as_bytes())
    }

    pub fn engine_log(&self) -> Option<String> {
        fs::read_to_string(self.path.join(ENGINE_LOG)).ok()
    }

    // -------------------------------------------------------------------------
    // Raw File Access
    // -------------------------------------------------------------------------

    /// Sorted file names, without cache and temporary files.
    pub fn files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.path) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != DETAILS_FILE && !name.starts_with(TEMP_PREFIX))
            .collect();
        names.sort();
        names
    }

    pub fn read_file(&self, name: &str) -> Result<FileContent> {
        if !is_safe_component(name) {
            return Err(WorkspaceError::InvalidFileName(name.to_string()).into());
        }
        let path = self.path.join(name);
        let mut bytes = Vec::new();
        File::open(&path)
            .with_context(|| format!("File with name {} not found", name))?
            .read_to_end(&mut bytes)?;

        let content = if bytes.contains(&0) {
            "This file is a binary file and cannot be shown as text".to_string()
        } else {
            String::from_utf8_lossy(&bytes).to_string()
        };
        Ok(FileContent {
            name: name.to_string(),
            content,
        })
    }

    /// Removes engine outputs, the state marker and the details cache.
    /// The configuration and logs stay. Returns the removed names.
    pub fn cleanup(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for name in self.files() {
            let engine_output = (name.starts_with("mf.")
                || name.starts_with("mt")
                || name.starts_with("MT"))
                && name.contains('.');
            if engine_output || name == STATE_FILE {
                fs::remove_file(self.path.join(&name))
                    .with_context(|| format!("Failed to remove {}", name))?;
                removed.push(name);
            }
        }
        let details = self.path.join(DETAILS_FILE);
        if details.is_file() {
            fs::remove_file(&details)?;
            removed.push(DETAILS_FILE.to_string());
        }
        removed.sort();
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Atomic Writes
    // -------------------------------------------------------------------------

    fn write_temp(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure()?;
        let temp_path = self
            .path
            .join(format!("{}{}-{}", TEMP_PREFIX, Uuid::new_v4().simple(), name));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(temp_path)
    }

    /// Replaces `name` with `bytes`; readers see the old or the new file.
    pub fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let temp_path = self.write_temp(name, bytes)?;
        if let Err(e) = fs::rename(&temp_path, self.path.join(name)) {
            fs::remove_file(&temp_path).ok();
            return Err(e).with_context(|| format!("Failed to publish {}", name));
        }
        Ok(())
    }

    /// Creates `name` only if it does not exist yet, fully written.
    /// Returns `false` when another writer got there first.
    pub fn create_exclusive(&self, name: &str, bytes: &[u8]) -> Result<bool> {
        let temp_path = self.write_temp(name, bytes)?;
        let linked = fs::hard_link(&temp_path, self.path.join(name));
        fs::remove_file(&temp_path).ok();

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_ids() {
        for id in ["", ".", "..", "a/b", "../x", "a b"] {
            assert!(validate_calculation_id(id).is_err(), "{:?}", id);
        }
        assert!(validate_calculation_id("7f0c-11_ab.v2").is_ok());
    }

    #[test]
    fn exclusive_create_keeps_first_writer() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let ws = root.workspace("calc").unwrap();

        assert!(ws.create_exclusive(DETAILS_FILE, b"first").unwrap());
        assert!(!ws.create_exclusive(DETAILS_FILE, b"second").unwrap());
        assert_eq!(fs::read(ws.path().join(DETAILS_FILE)).unwrap(), b"first");
        // No temp files left behind, details hidden from the listing.
        assert!(ws.files().is_empty());
    }

    #[test]
    fn marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceRoot::new(dir.path()).unwrap().workspace("calc").unwrap();

        assert_eq!(ws.read_marker(), None);
        ws.write_marker(JobState::Running).unwrap();
        assert_eq!(ws.read_marker(), Some(JobState::Running));
        assert_eq!(fs::read_to_string(ws.path().join(STATE_FILE)).unwrap(), "100");
    }
}
