pub mod bridge;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod notes;
pub mod pagination;

use crate::config::AppConfig;
use crate::notes::NotesCore;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Loads configuration, opens the note store and serves the stdio invoke
/// channel until stdin closes.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)?;
    init_tracing(&config).map_err(anyhow::Error::msg)?;
    tracing::info!(data_dir = %config.data_dir.display(), "starting note-shelf");

    let core = NotesCore::new(&config)?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let answered = bridge::serve(core, stdin, tokio::io::stdout()).await?;
    tracing::info!(answered, "note-shelf stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<(), String> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "note-shelf.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(non_blocking);

    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| error.to_string())
}
