//! renderq: render queue worker and control client
//!
//! `serve` runs the worker and reads control commands from stdin until EOF,
//! a `shutdown` command, or Ctrl-C, then drains the in-flight job.

mod args;
mod control;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use renderq_core::app::{AdminAllowList, ControlSurface};
use renderq_core::domain::UserId;
use renderq_core::impls::{
    CommandRenderer, DirectoryNotifier, FfmpegStitcher, HttpFetcher, SqliteJobStore,
};
use renderq_core::ports::SystemClock;
use renderq_core::{AppBuilder, RenderqConfig, Runtime, WorkQueue};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command, ServeArgs};
use crate::control::Flow;

const DEFAULT_FILTER: &str = "renderq=info,renderq_core=info,sqlx=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Serve(ref args) => serve(&cli, args).await,
        Command::Queue => {
            let control = open_control(&cli).await?;
            let entries = control.list_queue().await.context("failed to read queue")?;
            println!("{}", control.render_queue(&entries));
            Ok(())
        }
        Command::History { limit } => {
            let control = open_control(&cli).await?;
            let entries = control
                .list_history(limit)
                .await
                .context("failed to read history")?;
            println!("{}", control.render_history(&entries));
            Ok(())
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // logs go to stderr; stdout carries control replies
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn open_store(cli: &Cli) -> Result<SqliteJobStore> {
    SqliteJobStore::open(&cli.db)
        .await
        .with_context(|| format!("failed to open job store at {}", cli.db.display()))
}

/// Read-only access for the one-shot `queue`/`history` commands.
async fn open_control(cli: &Cli) -> Result<ControlSurface> {
    let store = open_store(cli).await?;
    let config = RenderqConfig::default();
    let clock = Arc::new(SystemClock);
    let queue = Arc::new(WorkQueue::new(
        Box::new(store),
        clock.clone(),
        config.retention(),
    ));
    Ok(ControlSurface::new(
        queue,
        clock,
        AdminAllowList::default(),
        config.history_limit,
    ))
}

async fn serve(cli: &Cli, args: &ServeArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => RenderqConfig::load(path).context("failed to load config")?,
        None => RenderqConfig::default(),
    };
    let config = args.apply(base);
    let store = open_store(cli).await?;
    let runtime = AppBuilder::new()
        .store(store)
        .fetcher(HttpFetcher::new().context("failed to build HTTP client")?)
        .renderer(CommandRenderer::new(&args.renderer).with_args(args.renderer_args.iter().cloned()))
        .stitcher(FfmpegStitcher::new(&args.ffmpeg))
        .notifier(DirectoryNotifier::new(&args.outbox))
        .config(config)
        .admins(args.admins.iter().copied().map(UserId::from_u64))
        .build()
        .context("failed to wire application")?
        .start()
        .await
        .context("startup recovery failed")?;
    info!(db = %cli.db.display(), outbox = %args.outbox.display(), "renderq serving");

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
        info!("interrupt received");
    };
    run_session(
        runtime,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        interrupt,
    )
    .await
}

/// Serve control commands, then drain the worker whatever ended the
/// session. A stdin/stdout failure is returned after the drain.
async fn run_session<R, W>(
    runtime: Runtime,
    input: R,
    output: W,
    interrupt: impl Future<Output = ()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = control_loop(&runtime, input, output, interrupt).await;
    if let Err(e) = &result {
        warn!(error = %e, "control channel failed, draining before exit");
    }
    runtime.shutdown().await;
    result
}

/// Answer control commands until EOF, a `shutdown` command, or `interrupt`.
async fn control_loop<R, W>(
    runtime: &Runtime,
    input: R,
    mut output: W,
    interrupt: impl Future<Output = ()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    tokio::pin!(interrupt);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = &mut interrupt => return Ok(()),
        };
        let Some(line) = line else {
            info!("stdin closed");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let (reply, flow) = match control::parse(&line) {
            Ok(command) => control::handle(runtime, command).await,
            Err(e) => (
                serde_json::json!({ "ok": false, "error": format!("invalid command: {e}") }),
                Flow::Continue,
            ),
        };
        let mut out = serde_json::to_vec(&reply).context("failed to encode reply")?;
        out.push(b'\n');
        output.write_all(&out).await.context("failed to write reply")?;
        output.flush().await.context("failed to write reply")?;

        if matches!(flow, Flow::Stop) {
            return Ok(());
        }
    }
}
