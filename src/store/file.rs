use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::record::VideoDocument;
use crate::pipeline::util::now_rfc3339;
use crate::store::{DocumentStore, StoreError, ensure_batch_size};

/// On-disk layout: `{ "collections": { "<name>": { "<doc id>": { ...fields } } } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DocumentFile {
    #[serde(default)]
    collections: BTreeMap<String, BTreeMap<String, VideoDocument>>,
}

/// JSON-file backed collection, rewritten atomically after every batch.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    collection: String,
    data: DocumentFile,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data: DocumentFile = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|err| file_error(&path, err))?;
            if raw.trim().is_empty() {
                DocumentFile::default()
            } else {
                serde_json::from_str(&raw).map_err(|err| file_error(&path, err))?
            }
        } else {
            DocumentFile::default()
        };
        Ok(Self {
            path,
            collection: collection.to_string(),
            data,
        })
    }

    fn docs(&self) -> Option<&BTreeMap<String, VideoDocument>> {
        self.data.collections.get(&self.collection)
    }

    /// Apply `change` to a copy of the collection and keep it only once it is on disk.
    fn commit<F>(&mut self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, VideoDocument>),
    {
        let mut next = self.data.clone();
        change(
            next.collections
                .entry(self.collection.clone())
                .or_default(),
        );
        persist(&self.path, &next)?;
        self.data = next;
        Ok(())
    }
}

fn persist(path: &Path, data: &DocumentFile) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| file_error(path, err))?;
    let body = serde_json::to_string_pretty(data).map_err(|err| file_error(path, err))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|err| file_error(path, err))?;
    tmp.write_all(body.as_bytes())
        .and_then(|_| tmp.write_all(b"\n"))
        .map_err(|err| file_error(path, err))?;
    tmp.persist(path)
        .map_err(|err| file_error(path, err.error))?;
    Ok(())
}

fn file_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::File {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

impl DocumentStore for JsonFileStore {
    fn describe(&self) -> String {
        format!("file:{}#{}", self.path.display(), self.collection)
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .docs()
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_batch(&mut self, ids: &[String]) -> Result<(), StoreError> {
        ensure_batch_size(ids.len())?;
        self.commit(|docs| {
            for id in ids {
                docs.remove(id);
            }
        })
    }

    fn upsert_batch(&mut self, docs: &[(String, VideoDocument)]) -> Result<(), StoreError> {
        ensure_batch_size(docs.len())?;
        let stamp = now_rfc3339();
        self.commit(|stored| {
            for (id, doc) in docs {
                let mut doc = doc.clone();
                doc.last_updated = Some(stamp.clone());
                stored.insert(id.clone(), doc);
            }
        })
    }

    fn get(&self, id: &str) -> Result<Option<VideoDocument>, StoreError> {
        Ok(self.docs().and_then(|docs| docs.get(id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(video_id: &str) -> VideoDocument {
        VideoDocument {
            video_id: video_id.to_string(),
            thumbnail_url: "https://x/y.png".to_string(),
            ..VideoDocument::default()
        }
    }

    #[test]
    fn upserts_survive_reopen_and_get_server_timestamp() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("store/docs.json");

        let mut store = JsonFileStore::open(&path, "videoMetadata").expect("open");
        store
            .upsert_batch(&[
                ("P1_D1_a.mp4".to_string(), doc("a.mp4")),
                ("P1_D1_b.mp4".to_string(), doc("b.mp4")),
            ])
            .expect("upsert");

        let reopened = JsonFileStore::open(&path, "videoMetadata").expect("reopen");
        assert_eq!(reopened.list_ids().expect("list").len(), 2);
        let got = reopened.get("P1_D1_a.mp4").expect("get").expect("some");
        assert_eq!(got.video_id, "a.mp4");
        assert!(got.last_updated.is_some());
    }

    #[test]
    fn collections_are_isolated() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("docs.json");

        let mut videos = JsonFileStore::open(&path, "videoMetadata").expect("open");
        videos
            .upsert_batch(&[("a".to_string(), doc("a"))])
            .expect("upsert");

        let mut other = JsonFileStore::open(&path, "videos").expect("open other");
        other
            .upsert_batch(&[("b".to_string(), doc("b"))])
            .expect("upsert other");
        other.delete_batch(&["a".to_string()]).expect("delete");

        let videos = JsonFileStore::open(&path, "videoMetadata").expect("reopen");
        assert_eq!(videos.list_ids().expect("list"), vec!["a".to_string()]);
    }

    #[test]
    fn delete_removes_listed_ids_only() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("docs.json");
        let mut store = JsonFileStore::open(&path, "videoMetadata").expect("open");
        store
            .upsert_batch(&[
                ("a".to_string(), doc("a")),
                ("b".to_string(), doc("b")),
                ("c".to_string(), doc("c")),
            ])
            .expect("upsert");

        store
            .delete_batch(&["a".to_string(), "c".to_string(), "zz".to_string()])
            .expect("delete");
        assert_eq!(store.list_ids().expect("list"), vec!["b".to_string()]);
        assert!(store.get("a").expect("get").is_none());
    }

    #[test]
    fn failed_write_leaves_no_trace_in_later_batches() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("docs.json");
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");

        let mut store = JsonFileStore::open(&path, "videoMetadata").expect("open");
        store
            .upsert_batch(&[("kept".to_string(), doc("kept"))])
            .expect("upsert");

        store.path = blocker.join("docs.json");
        assert!(
            store
                .upsert_batch(&[("lost".to_string(), doc("lost"))])
                .is_err()
        );
        assert!(store.delete_batch(&["kept".to_string()]).is_err());
        assert!(store.get("lost").expect("get").is_none());

        store.path = path.clone();
        store
            .upsert_batch(&[("ok".to_string(), doc("ok"))])
            .expect("upsert after failure");

        let reopened = JsonFileStore::open(&path, "videoMetadata").expect("reopen");
        assert_eq!(
            reopened.list_ids().expect("list"),
            vec!["kept".to_string(), "ok".to_string()]
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("docs.json");
        fs::write(&path, "{not json").expect("write");
        let err = JsonFileStore::open(&path, "videoMetadata").expect_err("corrupt");
        assert!(matches!(err, StoreError::File { .. }));
    }
}
