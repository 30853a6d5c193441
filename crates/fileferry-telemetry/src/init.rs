//! Subscriber installation and the build identifier stamped on logs.
//!
//! `init_logging` is the only place a global subscriber is installed; callers
//! pick pretty or JSON output and `RUST_LOG` overrides the configured level.

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::{Result, TelemetryError};

/// Level directive used when neither settings nor `RUST_LOG` name one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] when a global subscriber is
/// already in place.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let _ = BUILD_SHA.set(config.build_sha.to_string());
    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(output)
        .with(level_filter(config.level))
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })?;
    tracing::debug!(build_sha = build_sha(), format = ?config.format, "logging ready");
    Ok(())
}

/// Build identifier recorded by [`init_logging`], or `dev` before it runs.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// What [`init_logging`] installs.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Level directive such as `info` or `fileferry_transfer=debug`.
    pub level: &'a str,
    /// Output format.
    pub format: LogFormat,
    /// Build identifier recorded once per process.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Compact human-readable lines.
    Pretty,
}

impl LogFormat {
    /// Pretty for debug builds, JSON for release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Format named by a settings label; unknown or missing labels fall back to [`Self::infer`].
    #[must_use]
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|label| label.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => Self::Json,
            Some("pretty" | "text") => Self::Pretty,
            _ => Self::infer(),
        }
    }
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
