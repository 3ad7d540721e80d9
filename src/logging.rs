//! Structured logging setup.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::error::LoggingError;

pub const LOG_FILTER_ENV_VAR: &str = "AGENT_SESSION_LOG";
pub const LOG_FILE_ENV_VAR: &str = "AGENT_SESSION_LOG_FILE";
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives; `info` when unset.
    pub filter: Option<String>,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Reads `AGENT_SESSION_LOG` (falling back to `RUST_LOG`) and `AGENT_SESSION_LOG_FILE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            filter: env_string_opt(LOG_FILTER_ENV_VAR).or_else(|| env_string_opt("RUST_LOG")),
            file: env_string_opt(LOG_FILE_ENV_VAR).map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let directives = self.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directives).map_err(|source| LoggingError::Filter {
            filter: directives.to_string(),
            source,
        })
    }
}

/// Installs the global `tracing` subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed; the existing one stays
/// in place.
pub fn init_logging(config: &LogConfig) -> Result<bool, LoggingError> {
    let filter = config.env_filter()?;

    let installed = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| LoggingError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::Io {
                    path: path.clone(),
                    source,
                })?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
