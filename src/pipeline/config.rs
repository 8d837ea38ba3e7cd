use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::pipeline::verify::DEFAULT_SAMPLE_SIZE;
use crate::store::MAX_BATCH_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Firestore,
    File,
}

impl StoreBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "firestore" => Some(Self::Firestore),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Firestore => "firestore",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub project_id: String,
    pub database: String,
    pub collection: String,
    pub endpoint: String,
    pub token_file: Option<String>,
    pub file_path: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Firestore,
            project_id: String::new(),
            database: "(default)".to_string(),
            collection: "videoMetadata".to_string(),
            endpoint: "https://firestore.googleapis.com/v1".to_string(),
            token_file: None,
            file_path: "vmsync-documents.json".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub delete_batch_size: usize,
    pub insert_batch_size: usize,
    /// Sustained document writes per second the store tolerates.
    pub writes_per_sec: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: 500,
            insert_batch_size: 500,
            writes_per_sec: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub videos_csv: Option<String>,
    pub thumbnails_csv: Option<String>,
    pub merged_csv: String,
    pub video_base_url: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            videos_csv: None,
            thumbnails_csv: None,
            merged_csv: "merged_video_data.csv".to_string(),
            video_base_url: "https://sagafit.blob.core.windows.net/sagafitvideos".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub sample_size: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub store: StoreConfig,
    pub batch: BatchConfig,
    pub manifest: ManifestConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    store: Option<StoreConfig>,
    batch: Option<BatchConfig>,
    manifest: Option<ManifestConfig>,
    verify: Option<VerifyConfig>,
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_non_empty(lookup: EnvLookup<'_>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_string(lookup: EnvLookup<'_>, var: &str, fallback: &str) -> String {
    env_non_empty(lookup, var).unwrap_or_else(|| fallback.to_string())
}

fn env_or_optional(lookup: EnvLookup<'_>, var: &str, fallback: Option<String>) -> Option<String> {
    env_non_empty(lookup, var).or(fallback)
}

fn env_or_u64(lookup: EnvLookup<'_>, var: &str, fallback: u64) -> u64 {
    match env_non_empty(lookup, var) {
        Some(v) => v.parse::<u64>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn env_or_usize(lookup: EnvLookup<'_>, var: &str, fallback: usize) -> usize {
    match env_non_empty(lookup, var) {
        Some(v) => v.parse::<usize>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn validate(cfg: &SyncConfig) -> Result<()> {
    for (name, size) in [
        ("delete_batch_size", cfg.batch.delete_batch_size),
        ("insert_batch_size", cfg.batch.insert_batch_size),
    ] {
        if size == 0 || size > MAX_BATCH_SIZE {
            return Err(anyhow!(
                "invalid batch.{name}: require 1 <= size <= {MAX_BATCH_SIZE}"
            ));
        }
    }
    if cfg.batch.writes_per_sec == 0 {
        return Err(anyhow!("invalid batch.writes_per_sec: must be >= 1"));
    }
    if cfg.verify.sample_size == 0 {
        return Err(anyhow!("invalid verify.sample_size: must be >= 1"));
    }
    if cfg.store.collection.trim().is_empty() || cfg.store.collection.contains('/') {
        return Err(anyhow!(
            "invalid store.collection: must be a non-empty top-level collection id"
        ));
    }
    if cfg.store.timeout_secs == 0 {
        return Err(anyhow!("invalid store.timeout_secs: must be >= 1"));
    }
    if cfg.store.backend == StoreBackend::File && cfg.store.file_path.trim().is_empty() {
        return Err(anyhow!("invalid store.file_path: required for the file backend"));
    }
    Ok(())
}

fn resolve_config_path(lookup: EnvLookup<'_>) -> Option<PathBuf> {
    if let Some(custom) = env_non_empty(lookup, "VMSYNC_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    if let Some(home) = env_non_empty(lookup, "VMSYNC_HOME") {
        return Some(PathBuf::from(home).join("vmsync.toml"));
    }

    let config_dir = dirs::config_dir()?;
    Some(config_dir.join("vmsync").join("vmsync.toml"))
}

fn merge_file_config(base: &mut SyncConfig, lookup: EnvLookup<'_>) -> Result<Option<PathBuf>> {
    let Some(path) = resolve_config_path(lookup) else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialSyncConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse vmsync config {}: {err}", path.display()))?;
    if let Some(store) = parsed.store {
        base.store = store;
    }
    if let Some(batch) = parsed.batch {
        base.batch = batch;
    }
    if let Some(manifest) = parsed.manifest {
        base.manifest = manifest;
    }
    if let Some(verify) = parsed.verify {
        base.verify = verify;
    }
    Ok(Some(path))
}

fn emulator_endpoint(lookup: EnvLookup<'_>) -> Option<String> {
    let host = env_non_empty(lookup, "FIRESTORE_EMULATOR_HOST")?;
    Some(format!("http://{}/v1", host.trim_end_matches('/')))
}

fn apply_env_overrides(cfg: &mut SyncConfig, lookup: EnvLookup<'_>) -> Result<()> {
    if let Some(raw) = env_non_empty(lookup, "VMSYNC_STORE_BACKEND") {
        cfg.store.backend = StoreBackend::parse(&raw).ok_or_else(|| {
            anyhow!("invalid VMSYNC_STORE_BACKEND `{raw}`: use `firestore` or `file`")
        })?;
    }
    if let Some(project) = env_non_empty(lookup, "VMSYNC_FIRESTORE_PROJECT") {
        cfg.store.project_id = project;
    } else if cfg.store.project_id.is_empty()
        && let Some(project) = env_non_empty(lookup, "GOOGLE_CLOUD_PROJECT")
    {
        cfg.store.project_id = project;
    }
    cfg.store.database = env_or_string(lookup, "VMSYNC_FIRESTORE_DATABASE", &cfg.store.database);
    cfg.store.collection = env_or_string(lookup, "VMSYNC_COLLECTION", &cfg.store.collection);
    if let Some(endpoint) = emulator_endpoint(lookup) {
        cfg.store.endpoint = endpoint;
    }
    cfg.store.endpoint = env_or_string(lookup, "VMSYNC_FIRESTORE_ENDPOINT", &cfg.store.endpoint);
    cfg.store.token_file = env_or_optional(
        lookup,
        "VMSYNC_FIRESTORE_TOKEN_FILE",
        cfg.store.token_file.take(),
    );
    cfg.store.file_path = env_or_string(lookup, "VMSYNC_STORE_FILE", &cfg.store.file_path);
    cfg.store.timeout_secs =
        env_or_u64(lookup, "VMSYNC_REQUEST_TIMEOUT_SECS", cfg.store.timeout_secs);

    cfg.batch.delete_batch_size =
        env_or_usize(lookup, "VMSYNC_DELETE_BATCH_SIZE", cfg.batch.delete_batch_size);
    cfg.batch.insert_batch_size =
        env_or_usize(lookup, "VMSYNC_INSERT_BATCH_SIZE", cfg.batch.insert_batch_size);
    cfg.batch.writes_per_sec = env_or_u64(lookup, "VMSYNC_WRITES_PER_SEC", cfg.batch.writes_per_sec);

    cfg.manifest.videos_csv =
        env_or_optional(lookup, "VMSYNC_VIDEOS_CSV", cfg.manifest.videos_csv.take());
    cfg.manifest.thumbnails_csv =
        env_or_optional(lookup, "VMSYNC_THUMBNAILS_CSV", cfg.manifest.thumbnails_csv.take());
    cfg.manifest.merged_csv = env_or_string(lookup, "VMSYNC_MERGED_CSV", &cfg.manifest.merged_csv);
    cfg.manifest.video_base_url =
        env_or_string(lookup, "VMSYNC_VIDEO_BASE_URL", &cfg.manifest.video_base_url);

    cfg.verify.sample_size =
        env_or_usize(lookup, "VMSYNC_VERIFY_SAMPLE_SIZE", cfg.verify.sample_size);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SyncConfig,
    pub source: Option<PathBuf>,
}

pub fn load_config_with(lookup: EnvLookup<'_>) -> Result<LoadedConfig> {
    let mut cfg = SyncConfig::default();
    let source = merge_file_config(&mut cfg, lookup)?;
    apply_env_overrides(&mut cfg, lookup)?;
    validate(&cfg)?;
    Ok(LoadedConfig {
        config: cfg,
        source,
    })
}

pub fn load_config() -> Result<LoadedConfig> {
    load_config_with(&|var: &str| env::var(var).ok())
}
