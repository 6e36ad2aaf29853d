//! Usage-event aggregation and batched reporting.
//!
//! Every successful encrypt/decrypt enqueues an event. Events with the same
//! identity (everything except counts and timestamps) merge by bumping the
//! counter; the queue flushes when more than `minimum_count` additions are
//! pending, when `flush_interval` has elapsed since the last report, and at
//! client teardown. A `processing` flag keeps the teardown flush and a
//! hot-path flush from posting two overlapping reports.

use crate::cache::TtlCache;
use crate::config::{EventReportingConfig, TimestampGranularity};
use crate::datasets::DatasetKind;
use crate::error::{ClientError, ClientResult};
use crate::http::SignedClient;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const JSON: &str = "application/json";
const PRODUCT: &str = "ubiq-rust";
const API_VERSION: &str = "V3";
const USER_AGENT: &str = concat!("ubiq-rust/", env!("CARGO_PKG_VERSION"));

/// What the caller did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAction {
    Encrypt,
    Decrypt,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

/// One aggregated usage record.
#[derive(Clone, Debug)]
pub struct Event {
    pub api_key: String,
    pub dataset_name: String,
    pub dataset_group: String,
    pub action: EventAction,
    pub dataset_type: DatasetKind,
    pub key_number: u32,
    pub count: u64,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
}

impl Event {
    pub fn new(
        api_key: impl Into<String>,
        dataset_name: impl Into<String>,
        dataset_group: impl Into<String>,
        action: EventAction,
        dataset_type: DatasetKind,
        key_number: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            api_key: api_key.into(),
            dataset_name: dataset_name.into(),
            dataset_group: dataset_group.into(),
            action,
            dataset_type,
            key_number,
            count: 1,
            first_ts: now,
            last_ts: now,
        }
    }

    /// Identity key: every field except counts and timestamps.
    fn identity(&self) -> String {
        format!(
            "api_key='{}' datasets='{}' billing_action='{}' dataset_groups='{}' key_number='{}' dataset_type='{}'",
            self.api_key,
            self.dataset_name,
            self.action.as_str(),
            self.dataset_group,
            self.key_number,
            self.dataset_type.as_str(),
        )
    }
}

#[derive(Serialize)]
struct UsageReport<'a> {
    usage: Vec<UsageRecord<'a>>,
}

#[derive(Serialize)]
struct UsageRecord<'a> {
    api_key: &'a str,
    datasets: &'a str,
    dataset_groups: &'a str,
    action: &'static str,
    dataset_type: &'static str,
    key_number: u32,
    count: u64,
    first_call_timestamp: String,
    last_call_timestamp: String,
    product: &'static str,
    product_version: &'static str,
    #[serde(rename = "user-agent")]
    user_agent: &'static str,
    api_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_defined: Option<serde_json::Value>,
}

/// Aggregates usage events and posts batched reports.
#[derive(Clone)]
pub struct EventAggregator {
    http: Arc<SignedClient>,
    host: String,
    cfg: EventReportingConfig,
    events: TtlCache<Event>,
    /// Additions since the last flush; the cache's own `len` is TTL-blind
    /// and can drift after explicit clears, so flushing trusts this.
    queued: Arc<AtomicUsize>,
    /// Advisory re-entrancy guard for the flush path.
    processing: Arc<AtomicBool>,
    last_reported: Arc<Mutex<Instant>>,
    user_metadata: Arc<RwLock<Option<String>>>,
}

impl EventAggregator {
    pub fn new(http: Arc<SignedClient>, host: String, cfg: EventReportingConfig) -> Self {
        Self {
            http,
            host,
            cfg,
            events: TtlCache::new(),
            queued: Arc::new(AtomicUsize::new(0)),
            processing: Arc::new(AtomicBool::new(false)),
            last_reported: Arc::new(Mutex::new(Instant::now())),
            user_metadata: Arc::new(RwLock::new(None)),
        }
    }

    /// Merges `event` into the queue (same identity increments the
    /// existing record) and flushes if a trigger fires.
    pub async fn add_or_increment(&self, event: Event) -> ClientResult<()> {
        let identity = event.identity();
        let last_ts = event.last_ts;
        let increment = event.count;
        self.events
            .merge_or_insert(
                &identity,
                None,
                |existing| {
                    existing.count += increment;
                    existing.last_ts = last_ts;
                },
                move || event,
            )
            .await;
        self.queued.fetch_add(1, Ordering::SeqCst);

        if self.should_process() {
            self.process(false).await?;
        }
        Ok(())
    }

    /// Flush decision, checked on the hot path without locks.
    fn should_process(&self) -> bool {
        if self.processing.load(Ordering::SeqCst) {
            return false;
        }
        let queued = self.queued.load(Ordering::SeqCst);
        if queued == 0 {
            return false;
        }
        let elapsed = self
            .last_reported
            .lock()
            .expect("last_reported lock poisoned")
            .elapsed();
        if elapsed > Duration::from_secs(self.cfg.flush_interval) {
            return true;
        }
        // strict greater-than: a queue of exactly minimum_count waits
        queued > self.cfg.minimum_count
    }

    /// Drains the queue and posts one report. Re-entrant calls return
    /// immediately; failures are swallowed when `trap_exceptions` is set.
    pub async fn process(&self, async_post: bool) -> ClientResult<()> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = self.flush(async_post).await;
        self.processing.store(false, Ordering::SeqCst);

        match result {
            Err(e) if self.cfg.trap_exceptions => {
                warn!("usage report failed (trapped): {e}");
                Ok(())
            }
            other => other,
        }
    }

    async fn flush(&self, async_post: bool) -> ClientResult<()> {
        let drained = self.events.take_all().await;
        self.queued.store(0, Ordering::SeqCst);
        *self
            .last_reported
            .lock()
            .expect("last_reported lock poisoned") = Instant::now();

        if drained.is_empty() {
            return Ok(());
        }

        let user_defined = self.parsed_user_metadata();
        let usage = drained
            .iter()
            .map(|(_, e)| UsageRecord {
                api_key: &e.api_key,
                datasets: &e.dataset_name,
                dataset_groups: &e.dataset_group,
                action: e.action.as_str(),
                dataset_type: e.dataset_type.as_str(),
                key_number: e.key_number,
                count: e.count,
                first_call_timestamp: format_timestamp(
                    e.first_ts,
                    self.cfg.timestamp_granularity,
                ),
                last_call_timestamp: format_timestamp(e.last_ts, self.cfg.timestamp_granularity),
                product: PRODUCT,
                product_version: env!("CARGO_PKG_VERSION"),
                user_agent: USER_AGENT,
                api_version: API_VERSION,
                user_defined: user_defined.clone(),
            })
            .collect();
        let payload = serde_json::to_string(&UsageReport { usage })?;

        let url = format!("{}/api/v3/tracking/events", self.host);
        debug!("reporting {} usage record(s)", drained.len());

        if async_post {
            self.http.post_async(&url, payload, JSON);
            return Ok(());
        }

        let resp = self.http.post(&url, payload, JSON).await?;
        if !resp.success {
            return Err(ClientError::kms(resp.status, resp.content));
        }
        Ok(())
    }

    /// Attaches caller-supplied metadata to every subsequent event. The
    /// value must be a JSON object, non-empty, at most 1024 characters.
    pub fn add_user_metadata(&self, json: &str) -> ClientResult<()> {
        if json.chars().count() > 1024 {
            return Err(ClientError::InputInvalid(
                "user metadata exceeds 1024 characters".to_string(),
            ));
        }
        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            ClientError::InputInvalid(format!("user metadata is not valid JSON: {e}"))
        })?;
        match value.as_object() {
            Some(map) if !map.is_empty() => {
                *self
                    .user_metadata
                    .write()
                    .expect("user_metadata lock poisoned") = Some(json.to_string());
                Ok(())
            }
            _ => Err(ClientError::InputInvalid(
                "user metadata must be a non-empty JSON object".to_string(),
            )),
        }
    }

    fn parsed_user_metadata(&self) -> Option<serde_json::Value> {
        let raw = self
            .user_metadata
            .read()
            .expect("user_metadata lock poisoned")
            .clone()?;
        serde_json::from_str(&raw).ok()
    }

    /// Additions since the last flush.
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Renders a timestamp at the configured resolution: sub-minute
/// granularities pick an RFC 3339 fractional width, coarser ones truncate
/// to the boundary.
fn format_timestamp(ts: DateTime<Utc>, granularity: TimestampGranularity) -> String {
    let truncated = match granularity {
        TimestampGranularity::Micros => {
            return ts.to_rfc3339_opts(SecondsFormat::Micros, true);
        }
        TimestampGranularity::Millis => {
            return ts.to_rfc3339_opts(SecondsFormat::Millis, true);
        }
        TimestampGranularity::Seconds => ts,
        TimestampGranularity::Minutes => ts.with_second(0).expect("0 is a valid second"),
        TimestampGranularity::Hours => ts
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .expect("0 is a valid minute and second"),
        TimestampGranularity::HalfDays => ts
            .with_hour(ts.hour() - ts.hour() % 12)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .expect("half-day truncation stays in range"),
        TimestampGranularity::Days => ts
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .expect("midnight is a valid time"),
    };
    truncated.to_rfc3339_opts(SecondsFormat::Secs, true)
}
