//! Last-resort sink for rejected or undeliverable payloads.

use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::models::DeadLetter;
use crate::store::TelemetryStore;

const MAX_REASON_LEN: usize = 256;

/// Best-effort durable append of a rejection reason plus the original text.
///
/// This is the terminal failure path: if the store itself fails, the entry is
/// logged and dropped rather than letting the error cascade back into the
/// processing loop.
#[derive(Clone)]
pub struct DeadLetterSink {
    store: Arc<dyn TelemetryStore>,
}

impl DeadLetterSink {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn store(&self, reason: &str, payload_json: &str) {
        let entry = DeadLetter {
            id: Uuid::new_v4(),
            reason: sanitize_reason(reason),
            payload_json: payload_json.to_string(),
            created_at_utc: Utc::now(),
        };

        if let Err(e) = self.store.append_dead_letter(entry).await {
            error!(error = %e, "Failed to persist telemetry dead-letter entry");
        }
    }
}

fn sanitize_reason(reason: &str) -> String {
    if reason.trim().is_empty() {
        return "unspecified".to_string();
    }
    reason.chars().take(MAX_REASON_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn stores_reason_and_payload() {
        let store = Arc::new(InMemoryStore::new());
        let sink = DeadLetterSink::new(store.clone());

        sink.store("validation failed: progress", "{\"progress\":2.0}").await;

        let letters = store.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, "validation failed: progress");
        assert_eq!(letters[0].payload_json, "{\"progress\":2.0}");
    }

    #[tokio::test]
    async fn truncates_long_reasons() {
        let store = Arc::new(InMemoryStore::new());
        let sink = DeadLetterSink::new(store.clone());

        let long_reason = "x".repeat(1000);
        sink.store(&long_reason, "{}").await;

        assert_eq!(store.dead_letters().await[0].reason.chars().count(), 256);
    }

    #[tokio::test]
    async fn empty_reason_becomes_unspecified() {
        let store = Arc::new(InMemoryStore::new());
        let sink = DeadLetterSink::new(store.clone());

        sink.store("   ", "{}").await;

        assert_eq!(store.dead_letters().await[0].reason, "unspecified");
    }
}
