//! Runtime settings, taken from command-line flags or `COVMANAGER_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::error::Result;
use crate::jobs::RunnerConfig;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Path to the SQLite database.
    #[arg(long, global = true, env = "COVMANAGER_DB", default_value = ".covmanager.db")]
    pub db: PathBuf,

    /// Worker threads for diff/aggregate jobs (0 = one per CPU).
    #[arg(long, global = true, env = "COVMANAGER_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Seconds a finished job is kept without being polled.
    #[arg(long, global = true, env = "COVMANAGER_RETENTION_SECS", default_value_t = 600)]
    pub retention_secs: u64,

    /// Number of built coverage trees kept in memory.
    #[arg(long, global = true, env = "COVMANAGER_TREE_CACHE", default_value_t = 32)]
    pub tree_cache: usize,

    /// Seconds the CLI keeps polling a job before giving up.
    #[arg(long, global = true, env = "COVMANAGER_WAIT_SECS", default_value_t = 300)]
    pub wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: PathBuf::from(".covmanager.db"),
            workers: 0,
            retention_secs: 600,
            tree_cache: 32,
            wait_secs: 300,
        }
    }
}

impl Config {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workers: self.workers,
            retention: Duration::from_secs(self.retention_secs),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db, self.tree_cache)
    }
}
