//! # Event Pipeline Telemetry
//!
//! LGTM stack integration for the consensus event-intake pipeline.
//!
//! ## Components
//!
//! - **L**oki: structured log aggregation
//! - **G**rafana: unified dashboards (configured separately)
//! - **T**empo: distributed tracing via OpenTelemetry
//! - **M**etrics: Prometheus metrics for Mimir
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ep_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).await.expect("failed to init telemetry");
//!
//!     // pipeline runs here; traces, logs and metrics are now collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | Tempo OTLP endpoint |
//! | `OTEL_SERVICE_NAME` | `event-intake-pipeline` | Service name in traces |
//! | `LOKI_ENDPOINT` | `http://localhost:3100` | Loki push endpoint |
//! | `EP_LOG_LEVEL` | `info` | Log level filter (`telemetry.logLevel`) |
//! | `EP_METRICS_ADDR` | `0.0.0.0:9100` | Prometheus scrape address (`telemetry.metricsAddr`) |
//! | `EP_STAGE_ID` | `00` | Stage identifier |

#![allow(clippy::missing_const_for_fn)]
#![warn(missing_docs)]
#![allow(missing_docs)]

mod config;
mod context;
mod logging;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{PropagatedContext, TraceContext};
pub use logging::StructuredLogger;
pub use metrics::{
    register_metrics, CONSENSUS_EVENTS_PER_ROUND, CONSENSUS_ROUNDS_PRODUCED,
    EVENTS_CREATED, EVENTS_DEDUPLICATED, EVENTS_HASHED, EVENTS_INGESTED, EVENTS_REJECTED,
    EVENT_CREATION_RATE_LIMITED, FUTURE_EVENTS_BUFFERED, LATEST_DURABLE_SEQUENCE_NUMBER,
    MetricsHandle, ORPHANS_BUFFERED, ORPHANS_RELEASED, PCES_EVENTS_WRITTEN,
    PCES_FSYNC_FAILURES, PCES_SEGMENTS_ROTATED, SHADOWGRAPH_EVENTS_STORED,
    SIGNATURE_VERIFICATIONS, STAGE_ERRORS, STAGE_QUEUE_DEPTH,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("failed to initialize Loki logger: {0}")]
    LokiInit(String),

    #[error("failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

/// Initialize the complete LGTM telemetry stack.
///
/// Returns a guard that must be held for the lifetime of the process.
/// When dropped, it flushes all pending traces and logs.
///
/// # Errors
///
/// Returns `TelemetryError` if metrics registration or tracer
/// initialization fails.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    let tracing_guard = tracing_setup::init_tracing(&config).await?;
    let _logging_guard = logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shut down.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("shutting down telemetry");
    }
}

/// Creates a span tagged with the emitting stage's name.
#[macro_export]
macro_rules! stage_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Records a metric increment, optionally with label values.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Records a metric observation, optionally with label values.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "event-intake-pipeline");
    }
}
