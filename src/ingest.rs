// src/ingest.rs
//
// =============================================================================
// FLOWCALC: INGESTION (v 0.3 )
// =============================================================================
//
// Turns a configuration document into a workspace plus a QUEUED job.
// Schema validation of the model payload happens upstream.

use crate::core::{CalculationDocument, InsertOutcome};
use crate::jobstore::JobStore;
use crate::workspace::WorkspaceRoot;
use anyhow::Result;

/// Enqueues `doc`. While a job for the same calculation id is queued or
/// running, nothing is touched and `Skipped` is returned. The workspace is
/// reset and written under the store's write lock, so a concurrent submit of
/// the same id can never clear a workspace a job already owns.
pub fn submit(store: &JobStore, root: &WorkspaceRoot, doc: &CalculationDocument) -> Result<InsertOutcome> {
    let workspace = root.workspace(&doc.calculation_id)?;

    let outcome = store.insert_with(&doc.calculation_id, || {
        workspace.reset()?;
        workspace.write_configuration(doc)
    })?;

    match outcome {
        InsertOutcome::Inserted { id } => {
            log::info!("📨 Queued calculation {} as job {}", doc.calculation_id, id)
        }
        InsertOutcome::Skipped => log::info!(
            "Calculation {} is already queued or running, not resubmitting",
            doc.calculation_id
        ),
    }
    Ok(outcome)
}
