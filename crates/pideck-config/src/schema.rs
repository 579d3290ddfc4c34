use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("pideck"))
        .unwrap_or_else(|| PathBuf::from("./pideck-data"))
}

fn default_snapshot_every_deltas() -> u64 {
    1000
}

fn default_snapshot_every_secs() -> u64 {
    60
}

fn default_client_queue_max_deltas() -> u64 {
    10_000
}

fn default_client_queue_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_commit_latency_warn_ms() -> u64 {
    100
}

fn default_catch_up_batch_limit() -> usize {
    500
}

/// Root configuration object for the hub.
///
/// `allowed_roots` empty means "any path allowed". Every
/// other field has a sensible standalone default so an empty/missing config
/// file still produces a runnable hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,

    #[serde(default)]
    pub log: LogTuning,

    #[serde(default)]
    pub sync: SyncTuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            state_dir: default_state_dir(),
            allowed_roots: Vec::new(),
            log: LogTuning::default(),
            sync: SyncTuning::default(),
        }
    }
}

/// VersionedLog snapshotting / latency-warning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTuning {
    #[serde(default = "default_snapshot_every_deltas")]
    pub snapshot_every_deltas: u64,
    #[serde(default = "default_snapshot_every_secs")]
    pub snapshot_every_secs: u64,
    #[serde(default = "default_commit_latency_warn_ms")]
    pub commit_latency_warn_ms: u64,
}

impl Default for LogTuning {
    fn default() -> Self {
        Self {
            snapshot_every_deltas: default_snapshot_every_deltas(),
            snapshot_every_secs: default_snapshot_every_secs(),
            commit_latency_warn_ms: default_commit_latency_warn_ms(),
        }
    }
}

/// SyncHub per-client outbound-queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    #[serde(default = "default_client_queue_max_deltas")]
    pub client_queue_max_deltas: u64,
    #[serde(default = "default_client_queue_max_bytes")]
    pub client_queue_max_bytes: u64,
    #[serde(default = "default_catch_up_batch_limit")]
    pub catch_up_batch_limit: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            client_queue_max_deltas: default_client_queue_max_deltas(),
            client_queue_max_bytes: default_client_queue_max_bytes(),
            catch_up_batch_limit: default_catch_up_batch_limit(),
        }
    }
}
