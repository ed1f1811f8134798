//! Logger setup for the command line driver.

use anyhow::{Context, Result};
use flexi_logger::{Logger, LoggerHandle, opt_format};

/// Install the process logger, writing to stderr.
///
/// `RUST_LOG` wins over `default_spec` (for example `"info"` or
/// `"go_zero::mcts=trace"`). Keep the handle alive for as long as logging
/// is wanted.
pub fn setup_logging(default_spec: &str) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str(default_spec)
        .with_context(|| format!("invalid log specification '{default_spec}'"))?
        .format(opt_format)
        .start()
        .context("failed to start logger")
}
