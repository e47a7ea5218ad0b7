// Shared fixtures: MODFLOW-format artifacts and scripted engines.
#![allow(dead_code)]

use async_trait::async_trait;
use flowcalc::core::CalculationDocument;
use flowcalc::engine::{EngineOutcome, SimulationEngine};
use flowcalc::jobstore::JobStore;
use flowcalc::workspace::WorkspaceRoot;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const TIMES: [f32; 6] = [1.0, 31.0, 59.0, 90.0, 120.0, 151.0];

pub struct Env {
    pub dir: tempfile::TempDir,
    pub store: Arc<JobStore>,
    pub root: WorkspaceRoot,
}

pub fn env() -> Env {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JobStore::open(dir.path().join("modflow.db")).expect("open store"));
    let root = WorkspaceRoot::new(dir.path().join("modflow")).expect("workspace root");
    Env { dir, store, root }
}

pub fn document(calculation_id: &str, nlay: usize) -> CalculationDocument {
    serde_json::from_value(json!({
        "calculation_id": calculation_id,
        "author": "tester",
        "project": "fixtures",
        "model_id": "model-1",
        "type": "modflow",
        "version": "3.2.6",
        "data": {
            "mf": {
                "dis": {
                    "nlay": nlay,
                    "itmuni": 4,
                    "start_datetime": "2024-01-01"
                }
            }
        }
    }))
    .expect("fixture document")
}

/// Deterministic cell value used by the fixture writers.
pub fn cell_value(step: usize, layer: usize, row: usize, col: usize) -> f32 {
    100.0 + step as f32 * 10.0 + layer as f32 + row as f32 * 0.1 + col as f32 * 0.01
}

fn text16(label: &str) -> Vec<u8> {
    format!("{:>16}", label).into_bytes()
}

/// Single-precision head/drawdown file. Step `i` is (kstp 1, kper i+1).
pub fn write_head_file<F>(path: &Path, label: &str, times: &[f32], nlay: usize, nrow: usize, ncol: usize, value: F)
where
    F: Fn(usize, usize, usize, usize) -> f32,
{
    let mut out = Vec::new();
    for (step, totim) in times.iter().enumerate() {
        for layer in 0..nlay {
            out.extend_from_slice(&1i32.to_le_bytes());
            out.extend_from_slice(&(step as i32 + 1).to_le_bytes());
            out.extend_from_slice(&totim.to_le_bytes());
            out.extend_from_slice(&totim.to_le_bytes());
            out.extend_from_slice(&text16(label));
            out.extend_from_slice(&(ncol as i32).to_le_bytes());
            out.extend_from_slice(&(nrow as i32).to_le_bytes());
            out.extend_from_slice(&(layer as i32 + 1).to_le_bytes());
            for row in 0..nrow {
                for col in 0..ncol {
                    out.extend_from_slice(&value(step, layer, row, col).to_le_bytes());
                }
            }
        }
    }
    std::fs::write(path, out).expect("write head file");
}

/// Single-precision MT3D UCN file. Step `i` is (kstp 1, kper i+1).
pub fn write_ucn_file<F>(path: &Path, times: &[f32], nlay: usize, nrow: usize, ncol: usize, value: F)
where
    F: Fn(usize, usize, usize, usize) -> f32,
{
    let mut out = Vec::new();
    for (step, totim) in times.iter().enumerate() {
        for layer in 0..nlay {
            out.extend_from_slice(&(step as i32 + 1).to_le_bytes());
            out.extend_from_slice(&1i32.to_le_bytes());
            out.extend_from_slice(&(step as i32 + 1).to_le_bytes());
            out.extend_from_slice(&totim.to_le_bytes());
            out.extend_from_slice(&text16("CONCENTRATION"));
            out.extend_from_slice(&(ncol as i32).to_le_bytes());
            out.extend_from_slice(&(nrow as i32).to_le_bytes());
            out.extend_from_slice(&(layer as i32 + 1).to_le_bytes());
            for row in 0..nrow {
                for col in 0..ncol {
                    out.extend_from_slice(&value(step, layer, row, col).to_le_bytes());
                }
            }
        }
    }
    std::fs::write(path, out).expect("write ucn file");
}

/// List file with one budget block per step; totim in days.
/// Step `i` stores `STORAGE_IN = 10*(i+1)` cumulative and `i+1` incremental.
pub fn write_list_file(path: &Path, times: &[f32]) {
    let mut text = String::from("                                   MODFLOW-2005\n\n");
    for (step, totim) in times.iter().enumerate() {
        let kper = step + 1;
        let cum = 10.0 * (step as f64 + 1.0);
        let rate = step as f64 + 1.0;
        let days = *totim as f64;
        text.push_str(&format!(
            "
  VOLUMETRIC BUDGET FOR ENTIRE MODEL AT END OF TIME STEP    1, STRESS PERIOD {kper:>3}
  ------------------------------------------------------------------------------

     CUMULATIVE VOLUMES      L**3       RATES FOR THIS TIME STEP      L**3/T
     ------------------                 ------------------------

           IN:                                      IN:
           ---                                      ---
             STORAGE = {cum:>16.4}               STORAGE = {rate:>16.4}

            TOTAL IN = {cum:>16.4}              TOTAL IN = {rate:>16.4}

          OUT:                                     OUT:
          ----                                     ----
             STORAGE = {cum:>16.4}               STORAGE = {rate:>16.4}

           TOTAL OUT = {cum:>16.4}             TOTAL OUT = {rate:>16.4}

            IN - OUT = {zero:>16.4}              IN - OUT = {zero:>16.4}

 PERCENT DISCREPANCY =             0.00     PERCENT DISCREPANCY =             0.00

          TIME SUMMARY AT END OF TIME STEP    1 IN STRESS PERIOD {kper:>4}
                    SECONDS     MINUTES      HOURS       DAYS        YEARS
                    -----------------------------------------------------------
   TIME STEP LENGTH  {secs:>10.1}  {mins:>10.1}  {hours:>10.2}  {days:>10.4}  {years:>12.5E}
         TOTAL TIME  {secs:>10.1}  {mins:>10.1}  {hours:>10.2}  {days:>10.4}  {years:>12.5E}
",
            zero = 0.0,
            secs = days * 86400.0,
            mins = days * 1440.0,
            hours = days * 24.0,
            years = days / 365.25,
        ));
    }
    std::fs::write(path, text).expect("write list file");
}

/// Writes a complete set of artifacts the way a successful run would.
pub fn write_outputs(workspace: &Path, nlay: usize) {
    write_head_file(&workspace.join("mf.hds"), "HEAD", &TIMES, nlay, 2, 3, cell_value);
    write_head_file(&workspace.join("mf.ddn"), "DRAWDOWN", &TIMES, nlay, 2, 3, |s, l, r, c| {
        cell_value(s, l, r, c) - 100.0
    });
    write_ucn_file(&workspace.join("MT3D001.UCN"), &TIMES, nlay, 2, 3, |s, _, _, _| s as f32 * 0.5);
    write_list_file(&workspace.join("mf.list"), &TIMES);
}

// -----------------------------------------------------------------------------
// Scripted engines
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub enum Script {
    Succeed,
    Fail(String),
    Raise(String),
    Panic,
}

/// Engine double. Records, per call, the workspace marker seen mid-run.
pub struct ScriptedEngine {
    pub script: Script,
    pub markers_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            markers_seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SimulationEngine for ScriptedEngine {
    async fn run(&self, workspace: &Path) -> anyhow::Result<EngineOutcome> {
        let marker = std::fs::read_to_string(workspace.join("state")).ok();
        self.markers_seen.lock().unwrap().push(marker);

        match &self.script {
            Script::Succeed => {
                write_outputs(workspace, 2);
                Ok(EngineOutcome {
                    success: true,
                    report: "Normal termination of simulation".into(),
                })
            }
            Script::Fail(report) => Ok(EngineOutcome {
                success: false,
                report: report.clone(),
            }),
            Script::Raise(msg) => Err(anyhow::anyhow!("solver blew up").context(msg.clone())),
            Script::Panic => panic!("engine exploded"),
        }
    }
}
