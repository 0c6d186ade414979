//! Ingestion health counters shared between the connection manager and the
//! message processor.
//!
//! Counters are plain atomics so the receive callback never blocks; readers
//! only ever see an immutable [`IngestionMetrics`] snapshot. These values are
//! process-local observability, not a source of truth, and reset on restart.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Point-in-time snapshot of the ingestion counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionMetrics {
    pub connected: bool,
    pub last_message_utc: Option<DateTime<Utc>>,
    pub processed: u64,
    pub deserialization_failures: u64,
    pub validation_failures: u64,
    pub last_disconnect_reason: Option<String>,
    pub last_disconnect_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct IngestionMonitor {
    connected: AtomicBool,
    // Millisecond UTC timestamps; 0 means "never".
    last_message_ms: AtomicI64,
    last_disconnect_ms: AtomicI64,
    processed: AtomicU64,
    deserialization_failures: AtomicU64,
    validation_failures: AtomicU64,
    last_disconnect_reason: Mutex<Option<String>>,
}

impl IngestionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.last_disconnect_ms.store(0, Ordering::Release);
        if let Ok(mut reason) = self.last_disconnect_reason.lock() {
            *reason = None;
        }
    }

    pub fn report_disconnected(&self, reason: &str) {
        self.connected.store(false, Ordering::Release);
        self.last_disconnect_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        if let Ok(mut slot) = self.last_disconnect_reason.lock() {
            *slot = Some(reason.to_string());
        }
    }

    pub fn report_message_received(&self) {
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn report_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_deserialization_failure(&self) {
        self.deserialization_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestionMetrics {
        IngestionMetrics {
            connected: self.connected.load(Ordering::Acquire),
            last_message_utc: read_timestamp(self.last_message_ms.load(Ordering::Acquire)),
            processed: self.processed.load(Ordering::Relaxed),
            deserialization_failures: self.deserialization_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            last_disconnect_reason: self
                .last_disconnect_reason
                .lock()
                .map(|slot| slot.clone())
                .unwrap_or_default(),
            last_disconnect_utc: read_timestamp(self.last_disconnect_ms.load(Ordering::Acquire)),
        }
    }
}

fn read_timestamp(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        None
    } else {
        DateTime::from_timestamp_millis(millis)
    }
}
