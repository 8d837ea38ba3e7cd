use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("required input file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("{manifest} is missing required columns: {}", .missing.join(", "))]
    Schema {
        manifest: String,
        missing: Vec<String>,
    },
    #[error("cannot authenticate to document store: {0}")]
    Credential(String),
    #[error("delete batch {batch} failed after {deleted} deletions")]
    BatchDelete {
        batch: usize,
        deleted: u64,
        #[source]
        source: StoreError,
    },
    #[error("row {row} ({doc_id}) rejected: {reason}")]
    RowUpsert {
        row: usize,
        doc_id: String,
        reason: String,
    },
    #[error("insert batch {batch} failed to commit {rows} rows")]
    BatchCommit {
        batch: usize,
        rows: usize,
        #[source]
        source: StoreError,
    },
}
