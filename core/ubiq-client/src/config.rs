//! Client configuration.

use serde::Deserialize;

/// Tunable client behavior. Hosts typically deserialize this from a JSON
/// options file; every field has the documented default.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub logging: LoggingConfig,
    pub event_reporting: EventReportingConfig,
    pub key_caching: KeyCachingConfig,
    /// Cache fetched dataset definitions.
    pub dataset_caching: DatasetCachingConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable informational tracing.
    pub verbose: bool,
}

/// Usage-event reporting knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EventReportingConfig {
    /// Flush when more than this many events are queued (strict greater-than).
    pub minimum_count: usize,
    /// Flush when this many seconds elapsed since the last report.
    pub flush_interval: u64,
    /// Swallow reporter HTTP failures instead of propagating them.
    pub trap_exceptions: bool,
    pub timestamp_granularity: TimestampGranularity,
    /// Flush asynchronously at client teardown.
    pub destroy_report_async: bool,
}

impl Default for EventReportingConfig {
    fn default() -> Self {
        Self {
            minimum_count: 5,
            flush_interval: 2,
            trap_exceptions: false,
            timestamp_granularity: TimestampGranularity::default(),
            destroy_report_async: false,
        }
    }
}

/// Resolution of the timestamps attached to reported events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampGranularity {
    Micros,
    Millis,
    #[default]
    Seconds,
    Minutes,
    Hours,
    HalfDays,
    Days,
}

/// Data-key caching knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KeyCachingConfig {
    /// Cache keys for unstructured operations.
    pub unstructured: bool,
    /// Cache keys for structured operations.
    pub structured: bool,
    /// Keep cached keys RSA-wrapped, unwrapping on every use.
    pub encrypt: bool,
    pub ttl_seconds: u64,
}

impl Default for KeyCachingConfig {
    fn default() -> Self {
        Self {
            unstructured: true,
            structured: true,
            encrypt: false,
            ttl_seconds: 1800,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct DatasetCachingConfig {
    pub enabled: bool,
}

impl Default for DatasetCachingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
