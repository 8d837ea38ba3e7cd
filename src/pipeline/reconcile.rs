use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::pipeline::manifest::{ThumbnailRow, VideoRow};
use crate::pipeline::record::CanonicalVideoRecord;

const VIDEO_EXTENSION: &str = ".mp4";

/// Join key shared by both manifests: case-folded, `_` read as a space,
/// whitespace collapsed, trailing `.mp4` removed. Idempotent.
pub fn normalize(id: &str) -> String {
    let folded = id.to_lowercase().replace('_', " ");
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut key = collapsed.as_str();
    while let Some(stripped) = key.strip_suffix(VIDEO_EXTENSION) {
        key = stripped.trim_end();
    }
    key.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// Thumbnail rows ignored because an earlier row had the same key.
    pub duplicate_thumbnail_keys: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub records: Vec<CanonicalVideoRecord>,
    pub stats: ReconcileStats,
}

fn build_thumbnail_index(rows: &[ThumbnailRow]) -> (HashMap<String, String>, usize) {
    let mut index = HashMap::new();
    let mut duplicates = 0usize;
    for row in rows {
        let key = normalize(&row.key);
        if key.is_empty() || row.thumbnail_url.is_empty() {
            continue;
        }
        if index.contains_key(&key) {
            duplicates += 1;
            continue;
        }
        index.insert(key, row.thumbnail_url.clone());
    }
    (index, duplicates)
}

fn video_url_for(row: &VideoRow, video_base_url: &str) -> String {
    if !row.video_url.is_empty() {
        return row.video_url.clone();
    }
    let day = if row.day_name.is_empty() {
        &row.day_id
    } else {
        &row.day_name
    };
    format!(
        "{}/{}/{}/{}",
        video_base_url.trim_end_matches('/'),
        row.plan_id,
        day,
        row.video_id
    )
}

/// Left join: exactly one record per video row, in input order.
pub fn reconcile(
    videos: &[VideoRow],
    thumbnails: &[ThumbnailRow],
    video_base_url: &str,
) -> Reconciled {
    let (index, duplicate_thumbnail_keys) = build_thumbnail_index(thumbnails);
    let mut stats = ReconcileStats {
        total: videos.len(),
        duplicate_thumbnail_keys,
        ..ReconcileStats::default()
    };

    let records = videos
        .iter()
        .map(|row| {
            let key = normalize(&row.video_id);
            let thumbnail_url = match index.get(&key) {
                Some(url) => {
                    stats.matched += 1;
                    url.clone()
                }
                None => {
                    stats.unmatched += 1;
                    tracing::debug!(video_id = %row.video_id, key = %key, "no thumbnail match");
                    String::new()
                }
            };
            CanonicalVideoRecord {
                video_id: row.video_id.clone(),
                plan_id: row.plan_id.clone(),
                day_id: row.day_id.clone(),
                day_name: row.day_name.clone(),
                activity: row.activity.clone(),
                body_part: row.body_part.clone(),
                kind: row.kind.clone(),
                video_url: video_url_for(row, video_base_url),
                thumbnail_id: key,
                thumbnail_url,
            }
        })
        .collect();

    tracing::info!(
        total = stats.total,
        matched = stats.matched,
        unmatched = stats.unmatched,
        duplicate_thumbnail_keys = stats.duplicate_thumbnail_keys,
        "reconciled manifests"
    );
    Reconciled { records, stats }
}

pub const MERGED_HEADER: [&str; 10] = [
    "videoId",
    "plan_id",
    "day_id",
    "day_name",
    "activity",
    "type",
    "bodypart",
    "videourl",
    "thumbnailId",
    "thumbnailUrl",
];

/// Write the reconciled manifest; the output is itself a valid video manifest.
pub fn write_merged_csv(records: &[CanonicalVideoRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(MERGED_HEADER)?;
    for record in records {
        writer.write_record([
            &record.video_id,
            &record.plan_id,
            &record.day_id,
            &record.day_name,
            &record.activity,
            &record.kind,
            &record.body_part,
            &record.video_url,
            &record.thumbnail_id,
            &record.thumbnail_url,
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
