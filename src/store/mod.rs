pub mod file;
pub mod firestore;

use anyhow::Result;
use thiserror::Error;

use crate::error::SyncError;
use crate::pipeline::config::{StoreBackend, StoreConfig};
use crate::pipeline::record::VideoDocument;

/// Per-call document ceiling shared by every backend.
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{operation} returned status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("document file {path}: {message}")]
    File { path: String, message: String },
    #[error("batch of {size} documents exceeds the per-call limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Keyed document collection the replace and verify flows run against.
///
/// Implementations are bound to a single collection.
pub trait DocumentStore {
    /// Human-readable target, e.g. `firestore:projects/p/databases/(default)/videoMetadata`.
    fn describe(&self) -> String;

    fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    fn delete_batch(&mut self, ids: &[String]) -> Result<(), StoreError>;

    /// Full overwrite of each document; `lastUpdated` is assigned by the store.
    fn upsert_batch(&mut self, docs: &[(String, VideoDocument)]) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<VideoDocument>, StoreError>;
}

pub(crate) fn ensure_batch_size(size: usize) -> Result<(), StoreError> {
    if size > MAX_BATCH_SIZE {
        return Err(StoreError::BatchTooLarge {
            size,
            limit: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Map an auth rejection to the fatal credential error; pass everything else through.
pub fn classify(err: StoreError) -> anyhow::Error {
    match err {
        StoreError::Unauthorized(msg) => SyncError::Credential(msg).into(),
        other => other.into(),
    }
}

pub fn open_store(cfg: &StoreConfig) -> Result<Box<dyn DocumentStore>> {
    match cfg.backend {
        StoreBackend::Firestore => {
            let token = firestore::resolve_token(cfg)?;
            Ok(Box::new(firestore::FirestoreStore::connect(cfg, token)?))
        }
        StoreBackend::File => Ok(Box::new(file::JsonFileStore::open(
            &cfg.file_path,
            &cfg.collection,
        )?)),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    /// In-memory store with scripted failures, counted per call.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub docs: BTreeMap<String, VideoDocument>,
        pub fail_delete_call: Option<usize>,
        pub fail_upsert_call: Option<usize>,
        pub delete_calls: usize,
        pub upsert_calls: usize,
        pub batch_sizes: Vec<usize>,
        pub get_calls: Cell<usize>,
    }

    impl MemoryStore {
        pub fn with_ids(count: usize) -> Self {
            let mut store = Self::default();
            for i in 0..count {
                store
                    .docs
                    .insert(format!("old_{i:04}"), VideoDocument::default());
            }
            store
        }
    }

    impl DocumentStore for MemoryStore {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        fn list_ids(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.docs.keys().cloned().collect())
        }

        fn delete_batch(&mut self, ids: &[String]) -> Result<(), StoreError> {
            ensure_batch_size(ids.len())?;
            self.delete_calls += 1;
            self.batch_sizes.push(ids.len());
            if self.fail_delete_call == Some(self.delete_calls) {
                return Err(StoreError::Rejected("scripted delete failure".to_string()));
            }
            for id in ids {
                self.docs.remove(id);
            }
            Ok(())
        }

        fn upsert_batch(&mut self, docs: &[(String, VideoDocument)]) -> Result<(), StoreError> {
            ensure_batch_size(docs.len())?;
            self.upsert_calls += 1;
            self.batch_sizes.push(docs.len());
            if self.fail_upsert_call == Some(self.upsert_calls) {
                return Err(StoreError::Rejected("scripted commit failure".to_string()));
            }
            for (id, doc) in docs {
                let mut doc = doc.clone();
                doc.last_updated = Some("2026-01-01T00:00:00Z".to_string());
                self.docs.insert(id.clone(), doc);
            }
            Ok(())
        }

        fn get(&self, id: &str) -> Result<Option<VideoDocument>, StoreError> {
            self.get_calls.set(self.get_calls.get() + 1);
            Ok(self.docs.get(id).cloned())
        }
    }

    #[test]
    fn unauthorized_maps_to_credential_error() {
        let err = classify(StoreError::Unauthorized("401".to_string()));
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Credential(_))
        ));

        let err = classify(StoreError::Rejected("nope".to_string()));
        assert!(err.downcast_ref::<SyncError>().is_none());
    }

    #[test]
    fn oversized_batches_are_refused() {
        let mut store = MemoryStore::default();
        let ids: Vec<String> = (0..=MAX_BATCH_SIZE).map(|i| i.to_string()).collect();
        let err = store.delete_batch(&ids).expect_err("too large");
        assert!(matches!(err, StoreError::BatchTooLarge { size: 501, .. }));
    }
}
