use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Result;
use parley_core::Config;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PARLEY_LOG";
const DEFAULT_FILTER: &str = "parley=info,parley_core=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// The terminal UI owns the screen, so logs go to `<config_dir>/parley/parley.log`.
pub fn init_file() -> Result<()> {
    let dir = Config::config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("parley.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// For the bridge and one-shot commands; stdout stays clean for their output.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
}
