use std::path::PathBuf;

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};

use crate::config;

/// File log at `level` with rotation, warnings and errors duplicated to stderr.
/// stdout is reserved for filtered records, so nothing is logged there.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_dir = log_dir()?;

    Logger::try_with_str(level)
        .with_context(|| format!("invalid log level '{level}'"))?
        .log_to_file(FileSpec::default().directory(log_dir).basename(config::logging::LOG_FILE_NAME))
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("Paraphrase filter starting");
    log::info!("Version: {}", config::TOOL_VERSION);
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("{}", "=".repeat(60));

    Ok(())
}

fn log_dir() -> anyhow::Result<PathBuf> {
    let dir = match std::env::var(config::logging::LOG_DIR_ENV) {
        Ok(v) if !v.is_empty() => PathBuf::from(v),
        _ => home_dir()
            .context("cannot determine home directory for logs")?
            .join(config::logging::LOG_DIR_REL),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("failed creating log dir {}", dir.display()))?;
    Ok(dir)
}

pub fn home_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("HOME") {
        if !v.is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    // Windows fallback
    if let Ok(v) = std::env::var("USERPROFILE") {
        if !v.is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    None
}
