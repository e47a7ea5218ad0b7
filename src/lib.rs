// src/lib.rs
//
// =============================================================================
// FLOWCALC: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod config;
pub mod core;
pub mod details;
pub mod engine;
pub mod facade;
pub mod ingest;
pub mod jobstore;
pub mod logs;
pub mod results;
pub mod scheduler;
pub mod workspace;

// 2. Re-exports (The Public API)

pub use core::{CalculationDocument, InsertOutcome, Job, JobState, ResultKind, TimeKey};
pub use details::{Details, DetailsCache};
pub use engine::{EngineOutcome, ExternalEngine, SimulationEngine};
pub use facade::{FacadeError, QueryFacade};
pub use jobstore::JobStore;
pub use logs::{JobLogSink, WorkspaceLogger};
pub use scheduler::{FixedInterval, Tick, WaitStrategy, Worker};
pub use workspace::{Workspace, WorkspaceRoot};
