use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub home: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl SyncPaths {
    pub fn checkpoint_file(&self) -> PathBuf {
        self.state_dir.join("replace_checkpoint.json")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn default_home() -> Result<PathBuf> {
    if let Some(data) = dirs::data_local_dir() {
        return Ok(data.join("vmsync"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".vmsync"));
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SyncPaths> {
    let home = match env::var("VMSYNC_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => default_home()?,
    };

    let logs_dir = env_or_default_path("VMSYNC_LOGS_DIR", home.join("logs"));
    let state_dir = env_or_default_path("VMSYNC_STATE_DIR", home.join("state"));

    Ok(SyncPaths {
        home,
        logs_dir,
        state_dir,
    })
}
