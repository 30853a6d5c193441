//! Errors raised while installing logging or maintaining the metrics registry.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed, or installation failed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A collector could not be constructed or added to the registry.
    #[error("failed to set up metric")]
    Metric {
        /// Metric name.
        name: &'static str,
        /// `build` or `register`.
        stage: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The registry could not be rendered in the text exposition format.
    #[error("failed to render metrics")]
    Render {
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The rendered exposition was not UTF-8.
    #[error("rendered metrics were not valid utf-8")]
    RenderEncoding {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn build(name: &'static str, source: PrometheusError) -> Self {
        Self::Metric {
            name,
            stage: "build",
            source,
        }
    }

    pub(crate) const fn register(name: &'static str, source: PrometheusError) -> Self {
        Self::Metric {
            name,
            stage: "register",
            source,
        }
    }
}
