pub mod merge;
pub mod replace;
pub mod status;
pub mod verify;

use anyhow::{Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::pipeline::config::{ManifestConfig, SyncConfig};
use crate::pipeline::manifest::{load_thumbnail_manifest, load_video_manifest};
use crate::pipeline::reconcile::{Reconciled, reconcile};
use crate::pipeline::record::duplicate_document_ids;

/// Warnings listed per line before the rest are folded into a count.
const MAX_LISTED_WARNINGS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub details: Vec<String>,
    pub warnings: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            details: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.warnings.push(text.into());
    }

    /// Add one warning per item, capped, with a trailing count of the rest.
    pub fn warn_each<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut hidden = 0usize;
        for (i, item) in items.into_iter().enumerate() {
            if i < MAX_LISTED_WARNINGS {
                self.warnings.push(item);
            } else {
                hidden += 1;
            }
        }
        if hidden > 0 {
            self.warnings.push(format!("... and {hidden} more"));
        }
    }
}

pub fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

/// Manifest paths after applying CLI flags over config.
#[derive(Debug, Clone)]
pub struct ManifestInputs {
    pub videos: PathBuf,
    pub thumbnails: PathBuf,
}

impl ManifestInputs {
    pub fn resolve(
        videos: Option<PathBuf>,
        thumbnails: Option<PathBuf>,
        cfg: &ManifestConfig,
    ) -> Result<Self> {
        let videos = videos
            .or_else(|| cfg.videos_csv.as_ref().map(PathBuf::from))
            .ok_or_else(|| {
                anyhow!("no canonical manifest given; pass --videos or set manifest.videos_csv")
            })?;
        let thumbnails = thumbnails
            .or_else(|| cfg.thumbnails_csv.as_ref().map(PathBuf::from))
            .ok_or_else(|| {
                anyhow!(
                    "no thumbnail manifest given; pass --thumbnails or set manifest.thumbnails_csv"
                )
            })?;
        Ok(Self { videos, thumbnails })
    }

    pub fn paths(&self) -> [&Path; 2] {
        [self.videos.as_path(), self.thumbnails.as_path()]
    }
}

/// Load both manifests and join them, reporting the join counters.
pub fn load_and_reconcile(
    inputs: &ManifestInputs,
    cfg: &SyncConfig,
    report: &mut CommandReport,
) -> Result<Reconciled> {
    let videos = load_video_manifest(&inputs.videos)?;
    let thumbnails = load_thumbnail_manifest(&inputs.thumbnails)?;
    let reconciled = reconcile(
        &videos.rows,
        &thumbnails.rows,
        &cfg.manifest.video_base_url,
    );

    let stats = &reconciled.stats;
    report.detail(format!("videos={}", videos.path.display()));
    report.detail(format!(
        "thumbnails={} (key column {})",
        thumbnails.path.display(),
        thumbnails.key_column
    ));
    report.detail(format!(
        "rows={} matched={} unmatched={}",
        stats.total, stats.matched, stats.unmatched
    ));
    if stats.unmatched > 0 {
        report.warn(format!(
            "{} rows have no thumbnail and keep an empty thumbnailUrl",
            stats.unmatched
        ));
    }
    if stats.duplicate_thumbnail_keys > 0 {
        report.warn(format!(
            "{} thumbnail rows repeat an earlier key and were ignored",
            stats.duplicate_thumbnail_keys
        ));
    }
    report.warn_each(
        duplicate_document_ids(&reconciled.records)
            .into_iter()
            .map(|(id, count)| {
                format!("document id {id} appears {count} times; the last row wins")
            }),
    );
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_capped_with_a_count() {
        let mut report = CommandReport::new("merge");
        report.warn_each((0..25).map(|i| format!("w{i}")));
        assert_eq!(report.warnings.len(), MAX_LISTED_WARNINGS + 1);
        assert_eq!(report.warnings.last().map(String::as_str), Some("... and 5 more"));
    }

    #[test]
    fn cli_paths_win_over_config() {
        let cfg = ManifestConfig {
            videos_csv: Some("cfg_videos.csv".to_string()),
            thumbnails_csv: Some("cfg_thumbs.csv".to_string()),
            ..ManifestConfig::default()
        };
        let inputs =
            ManifestInputs::resolve(Some(PathBuf::from("cli.csv")), None, &cfg).expect("resolve");
        assert_eq!(inputs.videos, PathBuf::from("cli.csv"));
        assert_eq!(inputs.thumbnails, PathBuf::from("cfg_thumbs.csv"));

        let err = ManifestInputs::resolve(None, None, &ManifestConfig::default())
            .expect_err("nothing configured");
        assert!(err.to_string().contains("--videos"));
    }
}
