use anyhow::Result;
use std::env;
use std::path::Path;

use crate::commands::CommandReport;
use crate::pipeline::checkpoint;
use crate::pipeline::config::{LoadedConfig, StoreBackend};
use crate::pipeline::paths::SyncPaths;
use crate::pipeline::util::percent;

include!(concat!(env!("OUT_DIR"), "/vmsync_env_allowlist.rs"));

/// Allowlisted variables currently set; values are not echoed.
pub fn env_overrides_set(lookup: &dyn Fn(&str) -> Option<String>) -> Vec<&'static str> {
    GENERATED_VMSYNC_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| lookup(key).is_some_and(|v| !v.trim().is_empty()))
        .collect()
}

fn describe_manifest(report: &mut CommandReport, name: &str, configured: Option<&str>) {
    match configured {
        Some(path) if Path::new(path).exists() => report.detail(format!("{name}={path}")),
        Some(path) => {
            report.detail(format!("{name}={path}"));
            report.warn(format!("{name} {path} does not exist"));
        }
        None => report.detail(format!("{name}=(not set)")),
    }
}

pub fn run(loaded: &LoadedConfig, paths: &SyncPaths) -> Result<CommandReport> {
    let cfg = &loaded.config;
    let mut report = CommandReport::new("status");

    report.detail(match &loaded.source {
        Some(path) => format!("config={}", path.display()),
        None => "config=(defaults)".to_string(),
    });
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));

    report.detail(format!("store.backend={}", cfg.store.backend.label()));
    match cfg.store.backend {
        StoreBackend::Firestore => {
            report.detail(format!(
                "store.target={}/projects/{}/databases/{}",
                cfg.store.endpoint, cfg.store.project_id, cfg.store.database
            ));
            if cfg.store.project_id.is_empty() {
                report.warn("store.project_id is not set");
            }
        }
        StoreBackend::File => report.detail(format!("store.target={}", cfg.store.file_path)),
    }
    report.detail(format!("store.collection={}", cfg.store.collection));
    report.detail(format!(
        "batch delete={} insert={} writes_per_sec={}",
        cfg.batch.delete_batch_size, cfg.batch.insert_batch_size, cfg.batch.writes_per_sec
    ));
    report.detail(format!("verify.sample_size={}", cfg.verify.sample_size));
    describe_manifest(&mut report, "manifest.videos_csv", cfg.manifest.videos_csv.as_deref());
    describe_manifest(
        &mut report,
        "manifest.thumbnails_csv",
        cfg.manifest.thumbnails_csv.as_deref(),
    );

    match checkpoint::load(&paths.checkpoint_file())? {
        Some(cp) => {
            report.detail(format!(
                "checkpoint phase={} updated_at={}",
                cp.phase.label(),
                cp.updated_at
            ));
            report.detail(format!(
                "checkpoint deleted={}/{} added={}/{} ({:.1}%) errors={}",
                cp.deleted,
                cp.initial_count,
                cp.added,
                cp.total_rows,
                percent(cp.added + cp.errors, cp.total_rows),
                cp.errors
            ));
            if !cp.is_finished() {
                report.warn("an unfinished replace can be continued with `vmsync replace --resume`");
            }
        }
        None => report.detail("checkpoint=(none)"),
    }

    let overrides = env_overrides_set(&|key: &str| env::var(key).ok());
    if overrides.is_empty() {
        report.detail("env_overrides=(none)");
    } else {
        report.detail(format!("env_overrides={}", overrides.join(",")));
    }

    Ok(report)
}
