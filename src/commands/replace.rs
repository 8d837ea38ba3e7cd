use anyhow::{Result, bail};
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::commands::{CommandReport, ManifestInputs, load_and_reconcile};
use crate::pipeline::audit;
use crate::pipeline::checkpoint::{self, CheckpointStore, ReplaceCheckpoint};
use crate::pipeline::config::SyncConfig;
use crate::pipeline::confirm::confirm_destructive;
use crate::pipeline::pacing::{SystemClock, TokenBucket};
use crate::pipeline::paths::SyncPaths;
use crate::pipeline::replace::Replacer;
use crate::pipeline::util::{fingerprint_files, truncate_with_ellipsis};
use crate::store::{classify, open_store};

#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    pub videos: Option<PathBuf>,
    pub thumbnails: Option<PathBuf>,
    pub resume: bool,
    pub discard_checkpoint: bool,
}

/// Pick the checkpoint this run continues from, or start a fresh one.
fn prepare_checkpoint(
    opts: &ReplaceOptions,
    cfg: &SyncConfig,
    path: &std::path::Path,
    fingerprint: &str,
    total_rows: u64,
    report: &mut CommandReport,
) -> Result<ReplaceCheckpoint> {
    let existing = checkpoint::load(path)?.filter(|cp| !cp.is_finished());
    let fresh = || {
        ReplaceCheckpoint::start(
            &cfg.store.collection,
            fingerprint,
            total_rows,
            cfg.batch.delete_batch_size,
            cfg.batch.insert_batch_size,
        )
    };

    match existing {
        Some(cp) if opts.resume => {
            if !cp.matches_inputs(&cfg.store.collection, fingerprint) {
                bail!(
                    "checkpoint {} was written for other inputs or another collection; \
                     rerun with --discard-checkpoint to start over",
                    path.display()
                );
            }
            if cp.insert_batch_size != cfg.batch.insert_batch_size
                || cp.delete_batch_size != cfg.batch.delete_batch_size
            {
                report.warn("resuming with the batch sizes stored in the checkpoint");
            }
            report.detail(format!(
                "resuming from phase {} (deleted {}/{}, added {})",
                cp.phase.label(),
                cp.deleted,
                cp.initial_count,
                cp.added
            ));
            Ok(cp)
        }
        Some(cp) if opts.discard_checkpoint => {
            report.warn(format!(
                "unfinished checkpoint in phase {} is discarded once the run is confirmed",
                cp.phase.label()
            ));
            Ok(fresh())
        }
        Some(cp) => bail!(
            "an unfinished replace is recorded in {} (phase {}); \
             pass --resume to continue it or --discard-checkpoint to start over",
            path.display(),
            cp.phase.label()
        ),
        None if opts.resume => bail!("no unfinished replace to resume in {}", path.display()),
        None => Ok(fresh()),
    }
}

pub fn run<R: BufRead, W: Write>(
    opts: &ReplaceOptions,
    cfg: &SyncConfig,
    paths: &SyncPaths,
    input: &mut R,
    prompt: &mut W,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("replace");
    let inputs = ManifestInputs::resolve(
        opts.videos.clone(),
        opts.thumbnails.clone(),
        &cfg.manifest,
    )?;
    let reconciled = load_and_reconcile(&inputs, cfg, &mut report)?;
    let records = reconciled.records;
    let fingerprint = fingerprint_files(&inputs.paths())?;

    let checkpoint_path = paths.checkpoint_file();
    let mut cp = prepare_checkpoint(
        opts,
        cfg,
        &checkpoint_path,
        &fingerprint,
        records.len() as u64,
        &mut report,
    )?;

    let mut store = open_store(&cfg.store)?;
    let target = store.describe();
    let existing = store.list_ids().map_err(classify)?.len() as u64;
    report.detail(format!("target={target}"));

    if !confirm_destructive(input, prompt, &target, Some(existing))? {
        tracing::info!(target = %target, "replace cancelled by operator");
        audit::record(paths, "replace", "cancelled", &target);
        report.detail("cancelled: confirmation phrase not entered, nothing was changed");
        return Ok(report);
    }
    if opts.discard_checkpoint && checkpoint::remove(&checkpoint_path)? {
        tracing::info!(path = %checkpoint_path.display(), "discarded unfinished checkpoint");
    }

    audit::record(
        paths,
        "replace",
        "started",
        &format!("{target} rows={} existing={existing}", records.len()),
    );
    let limiter = TokenBucket::new(
        SystemClock::new(),
        cp.delete_batch_size.max(cp.insert_batch_size) as u64,
        cfg.batch.writes_per_sec,
    );
    let mut replacer = Replacer::new(
        store.as_mut(),
        limiter,
        CheckpointStore::at(&checkpoint_path),
    );
    let summary = match replacer.run(&records, &mut cp) {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(
                phase = cp.phase.label(),
                initial_count = cp.initial_count,
                deleted = cp.deleted,
                added = cp.added,
                errors = cp.errors,
                "replace aborted"
            );
            audit::record(paths, "replace", "failed", &format!("{err:#}"));
            return Err(err.context(format!(
                "replace aborted in phase {}; progress kept in {} (rerun with --resume)",
                cp.phase.label(),
                checkpoint_path.display()
            )));
        }
    };

    report.detail(format!("initial_count={}", summary.initial_count));
    report.detail(format!("deleted={}", summary.deleted));
    report.detail(format!("added={}", summary.added));
    report.detail(format!("errors={}", summary.errors));
    report.detail(format!("throttled_ms={}", summary.throttled_ms));
    report.warn_each(summary.failed_rows.iter().map(|row| {
        format!(
            "batch {} row {} not written: {}",
            row.batch,
            row.doc_id,
            truncate_with_ellipsis(&row.reason, 160)
        )
    }));
    if !summary.consistent() {
        report.warn(format!(
            "added {} documents but expected {}",
            summary.added,
            summary.expected_added()
        ));
    }
    audit::record(
        paths,
        "replace",
        "completed",
        &format!(
            "deleted={} added={} errors={}",
            summary.deleted, summary.added, summary.errors
        ),
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg() -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.batch.delete_batch_size = 2;
        cfg.batch.insert_batch_size = 2;
        cfg
    }

    #[test]
    fn unfinished_checkpoint_blocks_a_fresh_run() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("replace_checkpoint.json");
        let cfg = cfg();
        let mut stale = ReplaceCheckpoint::start("videoMetadata", "fp", 3, 2, 2);
        stale.phase = checkpoint::ReplacePhase::Inserting;
        checkpoint::save(&path, &stale).expect("save");

        let mut report = CommandReport::new("replace");
        let err = prepare_checkpoint(
            &ReplaceOptions::default(),
            &cfg,
            &path,
            "fp",
            3,
            &mut report,
        )
        .expect_err("blocked");
        assert!(err.to_string().contains("--resume"));

        let resume = ReplaceOptions {
            resume: true,
            ..ReplaceOptions::default()
        };
        let cp = prepare_checkpoint(&resume, &cfg, &path, "fp", 3, &mut report).expect("resume");
        assert_eq!(cp.phase, checkpoint::ReplacePhase::Inserting);

        assert!(prepare_checkpoint(&resume, &cfg, &path, "other", 3, &mut report).is_err());

        let discard = ReplaceOptions {
            discard_checkpoint: true,
            ..ReplaceOptions::default()
        };
        let cp = prepare_checkpoint(&discard, &cfg, &path, "fp", 3, &mut report).expect("discard");
        assert_eq!(cp.phase, checkpoint::ReplacePhase::Pending);
        assert!(path.exists(), "removal waits for confirmation");
    }

    #[test]
    fn resume_without_checkpoint_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("replace_checkpoint.json");
        let resume = ReplaceOptions {
            resume: true,
            ..ReplaceOptions::default()
        };
        let mut report = CommandReport::new("replace");
        assert!(prepare_checkpoint(&resume, &cfg(), &path, "fp", 0, &mut report).is_err());

        let mut done = ReplaceCheckpoint::start("videoMetadata", "fp", 0, 2, 2);
        done.phase = checkpoint::ReplacePhase::Completed;
        checkpoint::save(&path, &done).expect("save");
        let cp = prepare_checkpoint(&ReplaceOptions::default(), &cfg(), &path, "fp", 0, &mut report)
            .expect("finished checkpoints do not block");
        assert_eq!(cp.phase, checkpoint::ReplacePhase::Pending);
    }
}
