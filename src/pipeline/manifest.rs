use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// Column names are a contract with the upstream exporters.
pub const VIDEO_ID_COLUMNS: &[&str] = &["videoId", "videoId_x"];
pub const PLAN_ID_COLUMN: &str = "plan_id";
pub const DAY_ID_COLUMN: &str = "day_id";
pub const DAY_NAME_COLUMN: &str = "day_name";
pub const ACTIVITY_COLUMN: &str = "activity";
pub const TYPE_COLUMN: &str = "type";
pub const BODY_PART_COLUMN: &str = "bodypart";
pub const VIDEO_URL_COLUMN: &str = "videourl";
pub const THUMBNAIL_ID_COLUMN: &str = "thumbnailId";
pub const THUMBNAIL_URL_COLUMN: &str = "thumbnailUrl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoRow {
    pub video_id: String,
    pub plan_id: String,
    pub day_id: String,
    pub day_name: String,
    pub activity: String,
    pub kind: String,
    pub body_part: String,
    pub video_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbnailRow {
    pub key: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone)]
pub struct VideoManifest {
    pub path: PathBuf,
    pub rows: Vec<VideoRow>,
}

#[derive(Debug, Clone)]
pub struct ThumbnailManifest {
    pub path: PathBuf,
    /// Header the join key was read from (`thumbnailId` or `videoId`).
    pub key_column: String,
    pub rows: Vec<ThumbnailRow>,
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim().to_string(), i))
            .collect();
        Self { index }
    }

    fn position(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.index.get(*name).copied())
    }

    fn first_name<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        names
            .iter()
            .find(|name| self.index.contains_key(**name))
            .copied()
    }
}

fn cell(record: &csv::StringRecord, position: Option<usize>) -> String {
    position
        .and_then(|i| record.get(i))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    if !path.exists() {
        return Err(SyncError::MissingFile(path.to_path_buf()).into());
    }
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn manifest_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn load_video_manifest(path: &Path) -> Result<VideoManifest> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let columns = Columns::from_headers(&headers);

    let required: [(&str, &[&str]); 8] = [
        ("videoId", VIDEO_ID_COLUMNS),
        (PLAN_ID_COLUMN, &[PLAN_ID_COLUMN]),
        (DAY_ID_COLUMN, &[DAY_ID_COLUMN]),
        (ACTIVITY_COLUMN, &[ACTIVITY_COLUMN]),
        (TYPE_COLUMN, &[TYPE_COLUMN]),
        (BODY_PART_COLUMN, &[BODY_PART_COLUMN]),
        (VIDEO_URL_COLUMN, &[VIDEO_URL_COLUMN]),
        (THUMBNAIL_URL_COLUMN, &[THUMBNAIL_URL_COLUMN]),
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|(_, accepted)| columns.position(accepted).is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::Schema {
            manifest: manifest_label(path),
            missing,
        }
        .into());
    }

    let video_id = columns.position(VIDEO_ID_COLUMNS);
    let plan_id = columns.position(&[PLAN_ID_COLUMN]);
    let day_id = columns.position(&[DAY_ID_COLUMN]);
    let day_name = columns.position(&[DAY_NAME_COLUMN]);
    let activity = columns.position(&[ACTIVITY_COLUMN]);
    let kind = columns.position(&[TYPE_COLUMN]);
    let body_part = columns.position(&[BODY_PART_COLUMN]);
    let video_url = columns.position(&[VIDEO_URL_COLUMN]);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let record =
            record.with_context(|| format!("failed to parse {} line {}", path.display(), i + 2))?;
        rows.push(VideoRow {
            video_id: cell(&record, video_id),
            plan_id: cell(&record, plan_id),
            day_id: cell(&record, day_id),
            day_name: cell(&record, day_name),
            activity: cell(&record, activity),
            kind: cell(&record, kind),
            body_part: cell(&record, body_part),
            video_url: cell(&record, video_url),
        });
    }

    tracing::info!(path = %path.display(), rows = rows.len(), "loaded video manifest");
    Ok(VideoManifest {
        path: path.to_path_buf(),
        rows,
    })
}

pub fn load_thumbnail_manifest(path: &Path) -> Result<ThumbnailManifest> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let columns = Columns::from_headers(&headers);

    let key_names = [THUMBNAIL_ID_COLUMN, "videoId"];
    let key_column = columns.first_name(&key_names);
    let url_position = columns.position(&[THUMBNAIL_URL_COLUMN]);

    let mut missing = Vec::new();
    if key_column.is_none() {
        missing.push(format!("{THUMBNAIL_ID_COLUMN} (or videoId)"));
    }
    if url_position.is_none() {
        missing.push(THUMBNAIL_URL_COLUMN.to_string());
    }
    let (Some(key_column), Some(url_position)) = (key_column, url_position) else {
        return Err(SyncError::Schema {
            manifest: manifest_label(path),
            missing,
        }
        .into());
    };
    let key_position = columns.position(&[key_column]);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("failed to parse {} line {}", path.display(), i + 2))?;
        rows.push(ThumbnailRow {
            key: cell(&record, key_position),
            thumbnail_url: cell(&record, Some(url_position)),
        });
    }

    tracing::info!(
        path = %path.display(),
        rows = rows.len(),
        key_column,
        "loaded thumbnail manifest"
    );
    Ok(ThumbnailManifest {
        path: path.to_path_buf(),
        key_column: key_column.to_string(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const VIDEO_HEADER: &str =
        "videoId,plan_id,day_id,day_name,activity,type,bodypart,videourl,thumbnailUrl";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write csv");
        path
    }

    fn schema_missing(err: &anyhow::Error) -> Vec<String> {
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::Schema { missing, .. }) => missing.clone(),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_reported_before_parsing() {
        let tmp = tempdir().expect("tempdir");
        let err = load_video_manifest(&tmp.path().join("nope.csv")).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MissingFile(_))
        ));
        let err = load_thumbnail_manifest(&tmp.path().join("nope.csv")).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MissingFile(_))
        ));
    }

    #[test]
    fn loads_rows_in_order_and_trims_cells() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "videos.csv",
            &format!(
                "{VIDEO_HEADER}\nSquat_01.mp4, P1 ,D1,Day 1,Strength,Main,Legs,https://v/1,\nLunge.mp4,P1,D2,Day 2,Strength,Main,Legs,,\n"
            ),
        );
        let manifest = load_video_manifest(&path).expect("load");
        assert_eq!(manifest.rows.len(), 2);
        assert_eq!(manifest.rows[0].video_id, "Squat_01.mp4");
        assert_eq!(manifest.rows[0].plan_id, "P1");
        assert_eq!(manifest.rows[0].body_part, "Legs");
        assert_eq!(manifest.rows[1].video_url, "");
        assert_eq!(manifest.rows[1].day_name, "Day 2");
    }

    #[test]
    fn accepts_pandas_suffixed_video_id_and_bom() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "merged.csv",
            "\u{feff}videoId_x,plan_id,day_id,activity,type,bodypart,videourl,thumbnailUrl\na.mp4,P1,D1,x,y,z,u,t\n",
        );
        let manifest = load_video_manifest(&path).expect("load");
        assert_eq!(manifest.rows[0].video_id, "a.mp4");
        assert_eq!(manifest.rows[0].day_name, "");
    }

    #[test]
    fn schema_error_lists_all_missing_columns() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "videos.csv",
            "videoId,plan_id,activity,type,bodypart\na,P1,x,y,z\n",
        );
        let err = load_video_manifest(&path).expect_err("schema");
        assert_eq!(
            schema_missing(&err),
            vec!["day_id", "videourl", "thumbnailUrl"]
        );
    }

    #[test]
    fn ragged_rows_abort_the_load() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "videos.csv",
            &format!("{VIDEO_HEADER}\na,P1,D1,Day,x,y,z,u,t\nb,P1\n"),
        );
        let err = load_video_manifest(&path).expect_err("ragged");
        assert!(format!("{err:#}").contains("line 3"));
    }

    #[test]
    fn thumbnail_manifest_prefers_thumbnail_id_key() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "thumbs.csv",
            "videoId,thumbnailId,thumbnailUrl\nSquat_01.mp4,squat 01,https://x/y.png\n",
        );
        let manifest = load_thumbnail_manifest(&path).expect("load");
        assert_eq!(manifest.key_column, "thumbnailId");
        assert_eq!(manifest.rows[0].key, "squat 01");
        assert_eq!(manifest.rows[0].thumbnail_url, "https://x/y.png");
    }

    #[test]
    fn thumbnail_manifest_falls_back_to_video_id_key() {
        let tmp = tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "thumbs.csv",
            "videoId,thumbnailUrl\nSquat_01.mp4,https://x/y.png\n",
        );
        let manifest = load_thumbnail_manifest(&path).expect("load");
        assert_eq!(manifest.key_column, "videoId");
        assert_eq!(manifest.rows[0].key, "Squat_01.mp4");
    }

    #[test]
    fn thumbnail_manifest_requires_url_and_key() {
        let tmp = tempdir().expect("tempdir");
        let path = write(tmp.path(), "thumbs.csv", "name,url\na,b\n");
        let err = load_thumbnail_manifest(&path).expect_err("schema");
        assert_eq!(
            schema_missing(&err),
            vec!["thumbnailId (or videoId)", "thumbnailUrl"]
        );
    }
}
