//! Structured logging for Loki integration.
//!
//! Logs are formatted as JSON with consistent fields that Loki can parse:
//! `timestamp`, `level`, `stage`, `message`, `trace_id`, plus additional
//! context fields (event hash, sequence number) where relevant.

use crate::{TelemetryConfig, TelemetryError};

/// Structured logger handle.
pub struct StructuredLogger {
    _initialized: bool,
}

/// Initialize Loki-compatible structured logging.
///
/// Loki integration runs via the tracing-subscriber JSON layer; logs
/// reach Loki through a shipping agent (Promtail) or direct push, not
/// through this function directly.
///
/// # Errors
///
/// This never fails today; the `Result` exists so a future Loki push
/// client can report initialization errors without an API break.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    tracing::debug!(
        loki_endpoint = %config.loki_endpoint,
        json_logs = config.json_logs,
        "structured logging configured for Loki compatibility"
    );

    Ok(StructuredLogger { _initialized: true })
}

/// Log entry with consistent stage-tagged fields.
#[macro_export]
macro_rules! log_event {
    (info, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(stage = $stage, $($($field)*,)? $msg)
    };
    (warn, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(stage = $stage, $($($field)*,)? $msg)
    };
    (error, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(stage = $stage, $($($field)*,)? $msg)
    };
    (debug, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(stage = $stage, $($($field)*,)? $msg)
    };
}

/// Log an event-related occurrence with standard fields (hash, generation).
#[macro_export]
macro_rules! log_event_occurrence {
    ($level:ident, $stage:expr, $msg:expr, $event_hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            stage = $stage,
            event_hash = ?$event_hash,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a PCES-related occurrence with standard fields (sequence number).
#[macro_export]
macro_rules! log_pces_event {
    ($level:ident, $msg:expr, $sequence_number:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            stage = "pces",
            sequence_number = $sequence_number,
            $($($field)*,)?
            $msg
        )
    };
}
