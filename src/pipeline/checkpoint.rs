use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::pipeline::util::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplacePhase {
    /// Confirmed but the remote snapshot has not been taken yet.
    #[default]
    Pending,
    Deleting,
    Inserting,
    Completed,
}

impl ReplacePhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deleting => "deleting",
            Self::Inserting => "inserting",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub doc_id: String,
    pub batch: usize,
    pub reason: String,
}

/// Progress of one replace run, rewritten after every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceCheckpoint {
    pub schema_version: u32,
    pub collection: String,
    pub input_fingerprint: String,
    pub started_at: String,
    pub updated_at: String,
    pub phase: ReplacePhase,
    pub total_rows: u64,
    pub initial_count: u64,
    /// Snapshot ids not yet deleted.
    pub pending_delete: Vec<String>,
    pub deleted: u64,
    pub delete_batch_size: usize,
    pub insert_batch_size: usize,
    /// Zero-based index of the first insert batch not yet attempted.
    pub next_insert_batch: usize,
    pub added: u64,
    pub errors: u64,
    pub failed_rows: Vec<FailedRow>,
}

impl Default for ReplaceCheckpoint {
    fn default() -> Self {
        Self {
            schema_version: 1,
            collection: String::new(),
            input_fingerprint: String::new(),
            started_at: String::new(),
            updated_at: String::new(),
            phase: ReplacePhase::Pending,
            total_rows: 0,
            initial_count: 0,
            pending_delete: Vec::new(),
            deleted: 0,
            delete_batch_size: 0,
            insert_batch_size: 0,
            next_insert_batch: 0,
            added: 0,
            errors: 0,
            failed_rows: Vec::new(),
        }
    }
}

impl ReplaceCheckpoint {
    pub fn start(
        collection: &str,
        input_fingerprint: &str,
        total_rows: u64,
        delete_batch_size: usize,
        insert_batch_size: usize,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            collection: collection.to_string(),
            input_fingerprint: input_fingerprint.to_string(),
            started_at: now.clone(),
            updated_at: now,
            total_rows,
            delete_batch_size,
            insert_batch_size,
            ..Self::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == ReplacePhase::Completed
    }

    pub fn matches_inputs(&self, collection: &str, input_fingerprint: &str) -> bool {
        self.collection == collection && self.input_fingerprint == input_fingerprint
    }
}

pub fn load(path: &Path) -> Result<Option<ReplaceCheckpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: ReplaceCheckpoint = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

pub fn save(path: &Path, checkpoint: &ReplaceCheckpoint) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let data = serde_json::to_string_pretty(checkpoint)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn remove(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

/// Where the replacer persists progress. `None` keeps it in memory only.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    path: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn save(&self, checkpoint: &mut ReplaceCheckpoint) -> Result<()> {
        checkpoint.updated_at = now_rfc3339();
        match &self.path {
            Some(path) => save(path, checkpoint),
            None => Ok(()),
        }
    }
}
