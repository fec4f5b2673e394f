use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ducky_core::DuckyConfig;
use ducky_pipeline::DuckyPipeline;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ducky", version, about = "Watches a codebase and speaks up about changes")]
struct Cli {
    /// Project root to watch; defaults to the current directory.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Configuration file (TOML); `ducky.toml` in the working directory is
    /// picked up automatically when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the index database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run the initial scan and exit without watching.
    #[arg(long)]
    scan_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DuckyConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(root) = cli.root {
        config.project.root = root;
    }
    if let Some(db) = cli.db {
        config.index.db_path = db;
    }
    config.project.root = config
        .project
        .root
        .canonicalize()
        .with_context(|| format!("resolving project root {:?}", config.project.root))?;

    info!(
        root = %config.project.root.display(),
        db = %config.db_path().display(),
        "starting ducky"
    );
    let pipeline = DuckyPipeline::new(config).context("building pipeline")?;

    if cli.scan_only {
        let files = pipeline.bootstrap().await.context("initial scan")?;
        info!(files, "scan finished");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            signal_token.cancel();
        }
    });

    pipeline.run(shutdown).await.context("watch loop")?;
    Ok(())
}
