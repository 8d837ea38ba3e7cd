use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, ManifestInputs, load_and_reconcile};
use crate::pipeline::audit;
use crate::pipeline::config::SyncConfig;
use crate::pipeline::paths::SyncPaths;
use crate::pipeline::verify::verify;
use crate::store::open_store;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub videos: Option<PathBuf>,
    pub thumbnails: Option<PathBuf>,
    pub sample_size: Option<usize>,
}

pub fn run(opts: &VerifyOptions, cfg: &SyncConfig, paths: &SyncPaths) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let inputs = ManifestInputs::resolve(
        opts.videos.clone(),
        opts.thumbnails.clone(),
        &cfg.manifest,
    )?;
    let reconciled = load_and_reconcile(&inputs, cfg, &mut report)?;

    let store = open_store(&cfg.store)?;
    report.detail(format!("target={}", store.describe()));
    let sample_size = opts.sample_size.unwrap_or(cfg.verify.sample_size);
    let outcome = verify(store.as_ref(), &reconciled.records, sample_size)?;

    report.detail(format!(
        "csv_count={} doc_count={}",
        outcome.csv_count, outcome.doc_count
    ));
    if !outcome.counts_match() {
        report.warn(format!(
            "document count {} does not match manifest rows {} (deficit {})",
            outcome.doc_count,
            outcome.csv_count,
            outcome.deficit()
        ));
    }
    for sample in &outcome.samples {
        let state = if !sample.exists {
            "missing"
        } else if sample.passed() {
            "ok"
        } else {
            "mismatch"
        };
        report.detail(format!("sample[{}] {} {state}", sample.index, sample.doc_id));
        if sample.exists && !sample.passed() {
            report.warn(format!(
                "sample {} differs (videoId match={}, thumbnailUrl match={})",
                sample.doc_id, sample.video_id_matches, sample.thumbnail_url_matches
            ));
        } else if !sample.exists {
            report.warn(format!("sample {} is missing remotely", sample.doc_id));
        }
    }
    report.detail(if outcome.passed() {
        "verification passed"
    } else {
        "verification found mismatches"
    });

    audit::record(
        paths,
        "verify",
        if outcome.passed() { "passed" } else { "mismatch" },
        &format!(
            "csv_count={} doc_count={} samples={}",
            outcome.csv_count,
            outcome.doc_count,
            outcome.samples.len()
        ),
    );
    Ok(report)
}
