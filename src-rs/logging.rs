use anyhow::{Context, Result};
use flexi_logger::{detailed_format, Duplicate, FileSpec, Logger, LoggerHandle};
use std::env;
use std::path::PathBuf;

const LOG_DIR_ENV: &str = "WCM_LOG_DIR";

pub fn log_dir() -> Option<PathBuf> {
    env::var(LOG_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            directories::ProjectDirs::from("com", "WordCloudMagic", "wordcloud-magic")
                .map(|dirs| dirs.data_dir().join("logs"))
        })
}

/// Debug runs log everything to a timestamped file and echo warnings to stderr;
/// normal runs only report warnings on stderr. `RUST_LOG` overrides either level.
pub fn init_logging(debug: bool) -> Result<LoggerHandle> {
    if debug {
        if let Some(dir) = log_dir() {
            let handle = Logger::try_with_env_or_str("debug")
                .context("invalid log specification")?
                .log_to_file(
                    FileSpec::default()
                        .directory(&dir)
                        .basename("wordcloud-magic")
                        .suffix("log"),
                )
                .format(detailed_format)
                .duplicate_to_stderr(Duplicate::Warn)
                .start()
                .with_context(|| format!("failed to start file logger in {}", dir.display()))?;
            log::info!("debug logging to {}", dir.display());
            return Ok(handle);
        }
        eprintln!("Failed to create log file; logging to stderr");
        return Logger::try_with_env_or_str("debug")
            .context("invalid log specification")?
            .log_to_stderr()
            .start()
            .context("failed to start logger");
    }

    Logger::try_with_env_or_str("warn")
        .context("invalid log specification")?
        .log_to_stderr()
        .start()
        .context("failed to start logger")
}
