use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("fee_ledger=debug,info")
        } else {
            EnvFilter::new("fee_ledger=info,warn")
        }
    })
}

/// Log to `log_file` when given, otherwise to stderr.
///
/// The TUI always passes a file so log lines can't land on the alternate screen.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true);

        tracing_subscriber::registry()
            .with(filter(verbose))
            .with(file_layer)
            .try_init()?;

        tracing::info!(path = %path.display(), "tracing initialized");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
