use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, ManifestInputs, load_and_reconcile};
use crate::pipeline::config::SyncConfig;
use crate::pipeline::reconcile::write_merged_csv;

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub videos: Option<PathBuf>,
    pub thumbnails: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub fn run(opts: &MergeOptions, cfg: &SyncConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("merge");
    let inputs = ManifestInputs::resolve(
        opts.videos.clone(),
        opts.thumbnails.clone(),
        &cfg.manifest,
    )?;
    let reconciled = load_and_reconcile(&inputs, cfg, &mut report)?;

    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.manifest.merged_csv));
    write_merged_csv(&reconciled.records, &output)?;
    tracing::info!(rows = reconciled.records.len(), output = %output.display(), "merged manifest written");
    report.detail(format!("output={}", output.display()));
    Ok(report)
}
