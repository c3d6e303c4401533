//! Node configuration.
//!
//! Every section has defaults, so a config can be built in code with
//! `..Default::default()` or loaded from a TOML file such as:
//!
//! ```toml
//! database_path = "/var/lib/ledger/db"
//!
//! [sqdb]
//! backend = "sqlite"
//!
//! [checkpoint]
//! page_threshold = 1000
//!
//! [rpc_sub]
//! queue_capacity = 32
//! request_timeout_ms = 30000
//!
//! [job_queue]
//! threads = 4
//! ```

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default WAL size, in pages, at which a background checkpoint is scheduled.
pub const DEFAULT_CHECKPOINT_PAGES: u32 = 1000;

/// Default number of undelivered events kept per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the node's database files.
    pub database_path: PathBuf,

    /// Database backend selection.
    pub sqdb: SqdbConfig,

    /// WAL checkpoint scheduling.
    pub checkpoint: CheckpointConfig,

    /// Outbound event subscriptions.
    pub rpc_sub: RpcSubConfig,

    /// Background job pool.
    pub job_queue: JobQueueConfig,
}

impl NodeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// `[sqdb]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SqdbConfig {
    /// Backend name. Only `"sqlite"` is recognised.
    pub backend: String,
}

impl Default for SqdbConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
        }
    }
}

/// `[checkpoint]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// WAL size in pages at or above which a checkpoint is scheduled.
    pub page_threshold: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            page_threshold: DEFAULT_CHECKPOINT_PAGES,
        }
    }
}

/// `[rpc_sub]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RpcSubConfig {
    /// Max undelivered events per subscriber before newest are discarded.
    pub queue_capacity: usize,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl RpcSubConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RpcSubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            user_agent: concat!("ledger-courier/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// `[job_queue]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JobQueueConfig {
    /// Worker thread count.
    pub threads: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(2, 8);
        Self { threads }
    }
}
