use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Firestore rejects document ids longer than this many bytes.
pub const MAX_DOCUMENT_ID_BYTES: usize = 1500;

/// One reconciled video, the unit written to the remote collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalVideoRecord {
    pub video_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub day_name: String,
    pub activity: String,
    pub body_part: String,
    pub kind: String,
    pub video_url: String,
    /// Normalized join key used to resolve the thumbnail.
    pub thumbnail_id: String,
    /// Empty when no thumbnail matched.
    pub thumbnail_url: String,
}

/// Remote payload. Field names are the collection's wire contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoDocument {
    pub activity: String,
    #[serde(rename = "bodypart")]
    pub body_part: String,
    pub day_id: String,
    pub day_name: String,
    pub plan_id: String,
    pub thumbnail_id: String,
    pub thumbnail_url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub video_id: String,
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl VideoDocument {
    /// Every string field with its wire name; `lastUpdated` is store-assigned and excluded.
    pub fn string_fields(&self) -> [(&'static str, &str); 10] {
        [
            ("activity", self.activity.as_str()),
            ("bodypart", self.body_part.as_str()),
            ("dayId", self.day_id.as_str()),
            ("dayName", self.day_name.as_str()),
            ("planId", self.plan_id.as_str()),
            ("thumbnailId", self.thumbnail_id.as_str()),
            ("thumbnailUrl", self.thumbnail_url.as_str()),
            ("type", self.kind.as_str()),
            ("videoId", self.video_id.as_str()),
            ("videoUrl", self.video_url.as_str()),
        ]
    }
}

impl CanonicalVideoRecord {
    /// `{plan_id}_{day_id}_{video_id}`; no hidden inputs, so identical rows map to identical ids.
    pub fn document_id(&self) -> String {
        format!("{}_{}_{}", self.plan_id, self.day_id, self.video_id)
    }

    pub fn to_document(&self) -> VideoDocument {
        VideoDocument {
            activity: self.activity.clone(),
            body_part: self.body_part.clone(),
            day_id: self.day_id.clone(),
            day_name: self.day_name.clone(),
            plan_id: self.plan_id.clone(),
            thumbnail_id: self.thumbnail_id.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            kind: self.kind.clone(),
            video_id: self.video_id.clone(),
            video_url: self.video_url.clone(),
            last_updated: None,
        }
    }

    /// Build the `(id, payload)` pair, or the reason the row cannot be stored.
    pub fn build_document(&self) -> Result<(String, VideoDocument), String> {
        for (name, value) in [
            ("plan_id", &self.plan_id),
            ("day_id", &self.day_id),
            ("videoId", &self.video_id),
        ] {
            if value.is_empty() {
                return Err(format!("{name} is empty"));
            }
        }
        let id = self.document_id();
        validate_document_id(&id)?;
        Ok((id, self.to_document()))
    }
}

pub fn validate_document_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("document id is empty".to_string());
    }
    if id.contains('/') {
        return Err(format!("document id `{id}` contains `/`"));
    }
    if id == "." || id == ".." {
        return Err(format!("document id `{id}` is reserved"));
    }
    if id.len() >= 4 && id.starts_with("__") && id.ends_with("__") {
        return Err(format!("document id `{id}` matches the reserved __.*__ pattern"));
    }
    if id.len() > MAX_DOCUMENT_ID_BYTES {
        return Err(format!(
            "document id is {} bytes, limit is {MAX_DOCUMENT_ID_BYTES}",
            id.len()
        ));
    }
    Ok(())
}

/// Document ids produced by more than one record, with their occurrence count, in first-seen order.
pub fn duplicate_document_ids(records: &[CanonicalVideoRecord]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();
    for record in records {
        let id = record.document_id();
        let count = counts.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(id);
        }
    }
    order
        .into_iter()
        .map(|id| {
            let count = counts[&id];
            (id, count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(plan: &str, day: &str, video: &str) -> CanonicalVideoRecord {
        CanonicalVideoRecord {
            video_id: video.to_string(),
            plan_id: plan.to_string(),
            day_id: day.to_string(),
            ..CanonicalVideoRecord::default()
        }
    }

    #[test]
    fn document_id_is_plan_day_video() {
        let r = record("P1", "D1", "Squat_01.mp4");
        assert_eq!(r.document_id(), "P1_D1_Squat_01.mp4");
        assert_eq!(r.document_id(), r.clone().document_id());
    }

    #[test]
    fn build_rejects_unstorable_ids() {
        assert!(record("P1", "D1", "").build_document().is_err());
        assert!(record("P1", "D1", "a/b.mp4").build_document().is_err());
        assert!(record("P1", "", "a.mp4").build_document().is_err());
        let long = "x".repeat(MAX_DOCUMENT_ID_BYTES);
        assert!(record("P1", "D1", &long).build_document().is_err());
        assert!(record("P1", "D1", "a.mp4").build_document().is_ok());
    }

    #[test]
    fn reserved_ids_are_rejected() {
        assert!(validate_document_id("..").is_err());
        assert!(validate_document_id("__meta__").is_err());
        assert!(validate_document_id("____").is_err());
        assert!(validate_document_id("___").is_ok());
        assert!(validate_document_id("__x").is_ok());
    }

    #[test]
    fn document_serializes_with_wire_names() {
        let mut r = record("P1", "D1", "Squat_01.mp4");
        r.body_part = "Legs".to_string();
        r.kind = "Warmup".to_string();
        let json = serde_json::to_value(r.to_document()).expect("json");
        assert_eq!(json["bodypart"], "Legs");
        assert_eq!(json["type"], "Warmup");
        assert_eq!(json["planId"], "P1");
        assert!(json.get("lastUpdated").is_none());
    }

    #[test]
    fn duplicates_are_reported_once_with_counts() {
        let records = vec![
            record("P1", "D1", "a"),
            record("P1", "D1", "b"),
            record("P1", "D1", "a"),
            record("P1", "D1", "a"),
        ];
        assert_eq!(
            duplicate_document_ids(&records),
            vec![("P1_D1_a".to_string(), 3)]
        );
    }
}
