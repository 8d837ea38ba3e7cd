use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::SyncError;
use crate::pipeline::config::StoreConfig;
use crate::pipeline::record::VideoDocument;
use crate::store::{DocumentStore, StoreError, ensure_batch_size};

const LIST_PAGE_SIZE: usize = 300;
const SERVER_TIMESTAMP_FIELD: &str = "lastUpdated";

pub fn resolve_token(cfg: &StoreConfig) -> Result<String> {
    if let Ok(token) = env::var("VMSYNC_FIRESTORE_TOKEN") {
        let trimmed = token.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let Some(path) = cfg.token_file.as_deref() else {
        return Err(SyncError::Credential(
            "set VMSYNC_FIRESTORE_TOKEN or store.token_file".to_string(),
        )
        .into());
    };
    let raw = fs::read_to_string(path)
        .map_err(|err| SyncError::Credential(format!("failed to read token file {path}: {err}")))?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(SyncError::Credential(format!("token file {path} is empty")).into());
    }
    Ok(token.to_string())
}

pub struct FirestoreStore {
    client: Client,
    token: String,
    /// `{endpoint}/projects/{p}/databases/{d}/documents`
    documents_url: String,
    /// `projects/{p}/databases/{d}/documents`
    documents_name: String,
    collection: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl FirestoreStore {
    pub fn connect(cfg: &StoreConfig, token: String) -> Result<Self> {
        if cfg.project_id.trim().is_empty() {
            anyhow::bail!("store.project_id is required for the firestore backend");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let documents_name = format!(
            "projects/{}/databases/{}/documents",
            cfg.project_id, cfg.database
        );
        let endpoint = cfg.endpoint.trim_end_matches('/');
        Ok(Self {
            client,
            token,
            documents_url: format!("{endpoint}/{documents_name}"),
            documents_name,
            collection: cfg.collection.clone(),
        })
    }

    fn collection_url(&self) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.documents_url)
            .map_err(|err| StoreError::Decode(format!("invalid endpoint: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode("endpoint cannot be a base URL".to_string()))?
            .push(&self.collection);
        Ok(url)
    }

    fn document_url(&self, id: &str) -> Result<Url, StoreError> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode("endpoint cannot be a base URL".to_string()))?
            .push(id);
        Ok(url)
    }

    fn document_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_name, self.collection, id)
    }

    fn commit(&self, operation: &'static str, writes: Vec<Value>) -> Result<(), StoreError> {
        let url = format!("{}:commit", self.documents_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "writes": writes }))
            .send()?;
        check_status(operation, response)?;
        Ok(())
    }
}

fn check_status(operation: &'static str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoreError::Unauthorized(format!(
            "{operation} returned {status}: {}",
            body.trim()
        )));
    }
    Err(StoreError::Status {
        operation,
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

fn document_id_from_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

pub(crate) fn encode_fields(doc: &VideoDocument) -> Value {
    let mut fields = Map::new();
    for (name, value) in doc.string_fields() {
        fields.insert(name.to_string(), json!({ "stringValue": value }));
    }
    Value::Object(fields)
}

fn decode_string(fields: &Map<String, Value>, name: &str) -> String {
    let Some(value) = fields.get(name) else {
        return String::new();
    };
    if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(s) = value.get("integerValue").and_then(Value::as_str) {
        return s.to_string();
    }
    if let Some(n) = value.get("doubleValue").and_then(Value::as_f64) {
        return n.to_string();
    }
    String::new()
}

pub(crate) fn decode_fields(fields: &Map<String, Value>) -> VideoDocument {
    VideoDocument {
        activity: decode_string(fields, "activity"),
        body_part: decode_string(fields, "bodypart"),
        day_id: decode_string(fields, "dayId"),
        day_name: decode_string(fields, "dayName"),
        plan_id: decode_string(fields, "planId"),
        thumbnail_id: decode_string(fields, "thumbnailId"),
        thumbnail_url: decode_string(fields, "thumbnailUrl"),
        kind: decode_string(fields, "type"),
        video_id: decode_string(fields, "videoId"),
        video_url: decode_string(fields, "videoUrl"),
        last_updated: fields
            .get(SERVER_TIMESTAMP_FIELD)
            .and_then(|v| v.get("timestampValue"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    }
}

impl DocumentStore for FirestoreStore {
    fn describe(&self) -> String {
        format!("firestore:{}/{}", self.documents_name, self.collection)
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.collection_url()?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &LIST_PAGE_SIZE.to_string());
                // Smallest projection Firestore accepts; ids come from `name`.
                query.append_pair("mask.fieldPaths", "videoId");
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }
            let response = self.client.get(url).bearer_auth(&self.token).send()?;
            let page: ListDocumentsResponse = check_status("list", response)?
                .json()
                .map_err(|err| StoreError::Decode(format!("list response: {err}")))?;
            ids.extend(
                page.documents
                    .iter()
                    .map(|doc| document_id_from_name(&doc.name).to_string()),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(ids)
    }

    fn delete_batch(&mut self, ids: &[String]) -> Result<(), StoreError> {
        ensure_batch_size(ids.len())?;
        if ids.is_empty() {
            return Ok(());
        }
        let writes = ids
            .iter()
            .map(|id| json!({ "delete": self.document_name(id) }))
            .collect();
        self.commit("delete batch", writes)
    }

    fn upsert_batch(&mut self, docs: &[(String, VideoDocument)]) -> Result<(), StoreError> {
        ensure_batch_size(docs.len())?;
        if docs.is_empty() {
            return Ok(());
        }
        let writes = docs
            .iter()
            .map(|(id, doc)| {
                json!({
                    "update": {
                        "name": self.document_name(id),
                        "fields": encode_fields(doc),
                    },
                    "updateTransforms": [
                        { "fieldPath": SERVER_TIMESTAMP_FIELD, "setToServerValue": "REQUEST_TIME" }
                    ],
                })
            })
            .collect();
        self.commit("upsert batch", writes)
    }

    fn get(&self, id: &str) -> Result<Option<VideoDocument>, StoreError> {
        let url = self.document_url(id)?;
        let response = self.client.get(url).bearer_auth(&self.token).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawDocument = check_status("get", response)?
            .json()
            .map_err(|err| StoreError::Decode(format!("get response for {id}: {err}")))?;
        Ok(Some(decode_fields(&raw.fields)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::StoreConfig;

    fn sample_doc() -> VideoDocument {
        VideoDocument {
            activity: "Strength".to_string(),
            body_part: "Legs".to_string(),
            day_id: "D1".to_string(),
            day_name: "Day 1".to_string(),
            plan_id: "P1".to_string(),
            thumbnail_id: "squat 01".to_string(),
            thumbnail_url: "https://x/y.png".to_string(),
            kind: "Warmup".to_string(),
            video_id: "Squat_01.mp4".to_string(),
            video_url: "https://v/P1/Day 1/Squat_01.mp4".to_string(),
            last_updated: None,
        }
    }

    fn test_store(endpoint: &str) -> FirestoreStore {
        let cfg = StoreConfig {
            project_id: "fitsaga".to_string(),
            endpoint: endpoint.to_string(),
            ..StoreConfig::default()
        };
        FirestoreStore::connect(&cfg, "token".to_string()).expect("connect")
    }

    #[test]
    fn encode_uses_wire_field_names() {
        let fields = encode_fields(&sample_doc());
        assert_eq!(fields["bodypart"]["stringValue"], "Legs");
        assert_eq!(fields["type"]["stringValue"], "Warmup");
        assert_eq!(fields["videoId"]["stringValue"], "Squat_01.mp4");
        assert_eq!(fields["thumbnailUrl"]["stringValue"], "https://x/y.png");
        assert!(fields.get("lastUpdated").is_none());
    }

    #[test]
    fn decode_reads_strings_numbers_and_timestamp() {
        let raw = json!({
            "videoId": { "stringValue": "Squat_01.mp4" },
            "planId": { "integerValue": "12" },
            "thumbnailUrl": { "nullValue": null },
            "lastUpdated": { "timestampValue": "2026-10-16T08:00:00Z" }
        });
        let doc = decode_fields(raw.as_object().expect("object"));
        assert_eq!(doc.video_id, "Squat_01.mp4");
        assert_eq!(doc.plan_id, "12");
        assert_eq!(doc.thumbnail_url, "");
        assert_eq!(doc.last_updated.as_deref(), Some("2026-10-16T08:00:00Z"));
    }

    #[test]
    fn document_urls_escape_ids() {
        let store = test_store("http://localhost:8080/v1/");
        let url = store.document_url("P1_D1_Squat 01.mp4").expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/fitsaga/databases/(default)/documents/videoMetadata/P1_D1_Squat%2001.mp4"
        );
        assert_eq!(
            store.document_name("P1_D1_x"),
            "projects/fitsaga/databases/(default)/documents/videoMetadata/P1_D1_x"
        );
    }

    #[test]
    fn ids_come_from_the_last_name_segment() {
        assert_eq!(
            document_id_from_name("projects/p/databases/d/documents/videoMetadata/P1_D1_a.mp4"),
            "P1_D1_a.mp4"
        );
    }

    #[test]
    fn connect_requires_project() {
        let cfg = StoreConfig::default();
        assert!(FirestoreStore::connect(&cfg, "token".to_string()).is_err());
    }
}
