// CoinCat entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (log to file; stdout is for command output)
// 3. Load config
// 4. Open the local database
// 5. Build the sync client from the stored sync settings
// 6. Load persisted state and run the subcommand

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use coincat_app::app::{self, AppState};
use coincat_app::cli::{self, Cli};
use coincat_core::config;
use coincat_core::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing()?;
    info!("CoinCat starting up");

    let config = config::load_config().context("failed to load configuration")?;

    let db_path = config.db_path().context("failed to resolve database path")?;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&path_str(&db_path)?).context("failed to open database")?;
    info!("Database opened at {}", db_path.display());

    let store = app::remote_store(&config, &db)?;
    let sync = app::sync_client(store.clone());
    info!(cloud = sync.is_cloud(), "sync client ready");

    let mut state = AppState::new(config, db, sync);
    state.load().context("failed to load local state")?;

    let mut stdout = std::io::stdout();
    cli::execute(cli.command, state, store, &mut stdout).await?;

    info!("CoinCat finished");
    Ok(())
}

fn path_str(path: &Path) -> anyhow::Result<String> {
    path.to_str()
        .map(str::to_string)
        .with_context(|| format!("database path {} is not valid UTF-8", path.display()))
}

/// Initialize tracing to log to a file, keeping stdout for command output.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("coincat.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coincat=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
