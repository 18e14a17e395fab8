//! Runtime configuration for the queue, worker and pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables shared by the queue façade, worker loop and job pipeline.
///
/// Every field has a default, so a partial JSON/TOML document (or none at
/// all) deserializes into a usable config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderqConfig {
    /// Failed attempts allowed before a job is discarded.
    pub max_retries: u32,

    /// Completed rows older than this are purged.
    pub retention_hours: u64,

    /// How often a blocked render is checked for completion and cancellation.
    pub poll_interval_ms: u64,

    /// Pause between jobs.
    pub idle_pause_ms: u64,

    /// Parent for job-scoped temp files. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Interval of the periodic retention sweep. `None` sweeps only at startup.
    pub gc_interval_secs: Option<u64>,

    /// Default number of rows returned by `list_history`.
    pub history_limit: usize,

    /// Width and height of each orbit frame, in pixels.
    pub orbit_frame_size: u32,

    /// Camera rotation per orbit frame, in degrees.
    pub orbit_step_degrees: f64,

    /// Camera rotation applied before the first orbit frame, in degrees.
    pub orbit_start_degrees: f64,
}

impl Default for RenderqConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retention_hours: 24,
            poll_interval_ms: 500,
            idle_pause_ms: 500,
            scratch_dir: None,
            gc_interval_secs: None,
            history_limit: 10,
            orbit_frame_size: 320,
            orbit_step_degrees: 0.05,
            orbit_start_degrees: -45.0,
        }
    }
}

impl RenderqConfig {
    /// Load a JSON document; missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    pub fn gc_interval(&self) -> Option<Duration> {
        self.gc_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
