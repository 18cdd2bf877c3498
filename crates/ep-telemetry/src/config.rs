//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for the LGTM telemetry stack, covering log level and
/// metrics listen address among other knobs.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and logs.
    pub service_name: String,

    /// Stage identifier for this process (e.g. "hasher", "consensus").
    pub stage_id: String,

    /// OpenTelemetry OTLP endpoint for Tempo.
    pub otlp_endpoint: String,

    /// Loki push endpoint.
    pub loki_endpoint: String,

    /// `telemetry.logLevel`: log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether to enable console output (for development).
    pub console_output: bool,

    /// Whether to enable JSON formatted logs.
    pub json_logs: bool,

    /// `telemetry.metricsAddr`: bind address for the Prometheus scrape endpoint.
    pub metrics_addr: String,

    /// Network/deployment identifier (testnet, mainnet, devnet).
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "event-intake-pipeline".to_string(),
            stage_id: "00".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            loki_endpoint: "http://localhost:3100".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_addr: "0.0.0.0:9100".to_string(),
            network: "testnet".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OTEL_SERVICE_NAME`: service name (default: event-intake-pipeline)
    /// - `EP_STAGE_ID`: stage identifier (default: 00)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: Tempo endpoint
    /// - `LOKI_ENDPOINT`: Loki push endpoint
    /// - `EP_LOG_LEVEL` or `RUST_LOG`: log level (`telemetry.logLevel`)
    /// - `EP_CONSOLE_OUTPUT`: enable console output
    /// - `EP_JSON_LOGS`: enable JSON logs
    /// - `EP_METRICS_ADDR`: Prometheus scrape bind address (`telemetry.metricsAddr`)
    /// - `EP_NETWORK`: network name
    #[must_use]
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "event-intake-pipeline".to_string()),

            stage_id: env::var("EP_STAGE_ID").unwrap_or_else(|_| "00".to_string()),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),

            loki_endpoint: env::var("LOKI_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:3100".to_string()),

            log_level: env::var("EP_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("EP_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("EP_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            metrics_addr: env::var("EP_METRICS_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9100".to_string()),

            network: env::var("EP_NETWORK").unwrap_or_else(|_| "testnet".to_string()),
        }
    }

    /// Create configuration for a specific stage.
    #[must_use]
    pub fn for_stage(stage_id: &str, stage_name: &str) -> Self {
        let mut config = Self::from_env();
        config.stage_id = stage_id.to_string();
        config.service_name = format!("ep-{}-{}", stage_id, stage_name);
        config
    }

    /// Full service name including stage identifier.
    #[must_use]
    pub fn full_service_name(&self) -> String {
        if self.stage_id == "00" {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.stage_id)
        }
    }
}
