use crate::pipeline::paths::SyncPaths;
use crate::pipeline::util::now_rfc3339;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at: String,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &SyncPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at: now_rfc3339(),
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.audit_log();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit failures must not abort a half-finished replace; log and move on.
pub fn record(paths: &SyncPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        tracing::warn!(error = %err, phase, "failed to append audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_are_appended_as_json_lines() {
        let tmp = tempdir().expect("tempdir");
        let paths = SyncPaths {
            home: tmp.path().to_path_buf(),
            logs_dir: tmp.path().join("logs"),
            state_dir: tmp.path().join("state"),
        };

        append_event(&paths, "delete", "started", "12 documents").expect("first");
        append_event(&paths, "delete", "completed", "12 deleted").expect("second");

        let raw = fs::read_to_string(paths.audit_log()).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(parsed["phase"], "delete");
        assert_eq!(parsed["status"], "completed");
    }
}
