//! skymines-server binary
//!
//! Runs the engine next to a game server, speaking newline-delimited JSON on
//! stdin/stdout (see `skymines::bridge`).
//!
//! ## Configuration
//!
//! | Flag / env                     | Default                | Description                   |
//! |--------------------------------|------------------------|-------------------------------|
//! | `--config` / `SKYMINES_CONFIG` | `skymines.toml`        | TOML file with zones + nodes  |
//! | `--storage` / `SKYMINES_STORAGE` | `[settings].storage_path` | JSON storage document   |
//!
//! Any file key can also be overridden with `SKYMINES__<SECTION>__<KEY>`.
//! Logs go to stderr so they never mix with protocol output.

use anyhow::Result;
use clap::Parser;
use skymines::{config, HostBridge, JsonFileStorage, MemoryHost, MineService};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "skymines-server", about = "SkyMines engine", version)]
struct Args {
    /// Configuration file
    #[arg(long, env = "SKYMINES_CONFIG", default_value = "skymines.toml")]
    config: PathBuf,

    /// Storage document, overriding `[settings].storage_path`
    #[arg(long, env = "SKYMINES_STORAGE")]
    storage: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // A bad file is reported after logging is up; the service then starts
    // soft-disabled and a later `reload` can fix it.
    let loaded = config::load_from_path(&args.config);
    let debug = matches!(&loaded, Ok(c) if c.settings.as_ref().is_some_and(|s| s.debug));
    let directive = if debug { "skymines=debug" } else { "skymines=info" };

    // Initialise logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    tracing::info!(config = %args.config.display(), "Starting skymines-server");

    let loaded = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Configuration unusable, starting disabled: {e}");
            config::LoadedConfig::default()
        }
    };

    let storage_path = args
        .storage
        .or_else(|| loaded.settings.as_ref().map(|s| s.storage_path.clone()))
        .unwrap_or_else(|| config::Settings::default().storage_path);
    let storage = Arc::new(JsonFileStorage::open(&storage_path)?);

    let host = Arc::new(MemoryHost::new());
    let service = MineService::new(host.clone(), storage, Some(args.config));
    let skipped = service.reload_with(loaded);
    if !skipped.is_empty() {
        tracing::warn!("{} configuration entries skipped", skipped.len());
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    // Run until the host closes stdin or Ctrl-C
    HostBridge::new(service, host).run(stdin, stdout).await
}
