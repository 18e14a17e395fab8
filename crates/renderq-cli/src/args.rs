//! Command-line surface for `renderq`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use renderq_core::RenderqConfig;

#[derive(Parser, Debug)]
#[command(name = "renderq", version, about = "Durable render queue for voxel scene uploads")]
pub struct Cli {
    /// SQLite database file holding the job queue
    #[arg(long, env = "RENDERQ_DB", default_value = "renderq.db")]
    pub db: PathBuf,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "RENDERQ_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the worker and read control commands (JSON lines) from stdin
    Serve(ServeArgs),
    /// Print the current queue and exit
    Queue,
    /// Print recently completed renders and exit
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON file with queue and render tunables; flags below override it
    #[arg(long, env = "RENDERQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Parent directory for job-scoped temporary files
    #[arg(long, env = "RENDERQ_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Directory that receives delivered messages and artifacts
    #[arg(long, env = "RENDERQ_OUTBOX", default_value = "outbox")]
    pub outbox: PathBuf,

    /// External renderer program, invoked once per frame
    #[arg(long, env = "RENDERQ_RENDERER")]
    pub renderer: PathBuf,

    /// Extra arguments placed before the per-frame ones
    #[arg(long = "renderer-arg", env = "RENDERQ_RENDERER_ARGS", value_delimiter = ' ')]
    pub renderer_args: Vec<String>,

    #[arg(long, env = "RENDERQ_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Failed attempts before a job is discarded [default: 3]
    #[arg(long, env = "RENDERQ_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Render completion/cancellation poll interval [default: 500]
    #[arg(long, env = "RENDERQ_POLL_MS")]
    pub poll_ms: Option<u64>,

    /// Completed jobs older than this are purged [default: 24]
    #[arg(long, env = "RENDERQ_RETENTION_HOURS")]
    pub retention_hours: Option<u64>,

    /// Periodic retention sweep; 0 or unset sweeps only at startup
    #[arg(long, env = "RENDERQ_GC_INTERVAL_SECS")]
    pub gc_interval_secs: Option<u64>,

    /// Users allowed to cancel any job (comma separated)
    #[arg(long = "admin", env = "RENDERQ_ADMINS", value_delimiter = ',')]
    pub admins: Vec<u64>,
}

impl ServeArgs {
    /// Apply the flags that were given on top of `base`.
    pub fn apply(&self, mut base: RenderqConfig) -> RenderqConfig {
        if let Some(max_retries) = self.max_retries {
            base.max_retries = max_retries;
        }
        if let Some(poll_ms) = self.poll_ms {
            base.poll_interval_ms = poll_ms;
        }
        if let Some(hours) = self.retention_hours {
            base.retention_hours = hours;
        }
        if self.scratch_dir.is_some() {
            base.scratch_dir = self.scratch_dir.clone();
        }
        if self.gc_interval_secs.is_some() {
            base.gc_interval_secs = self.gc_interval_secs;
        }
        base
    }
}
