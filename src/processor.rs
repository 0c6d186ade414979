//! Per-message processing: decode, validate, reconcile, fan out.
//!
//! Every failure category has a distinct outcome. Rejections before
//! persistence bump the matching monitor counter and dead-letter the raw
//! text. A storage failure dead-letters without touching the counters. A
//! broadcast failure after a successful commit is recorded but never undoes
//! the commit, so the processed counter still advances.

use std::sync::Arc;

use tracing::{error, warn};

use crate::analytics::AnalyticsQueue;
use crate::dead_letter::DeadLetterSink;
use crate::monitor::IngestionMonitor;
use crate::payload::{self, RejectionReason};
use crate::publish::{LiveUpdatePublisher, VehicleStateDto};
use crate::reconcile::Reconciler;

pub struct TelemetryProcessor {
    monitor: Arc<IngestionMonitor>,
    reconciler: Reconciler,
    publisher: Arc<dyn LiveUpdatePublisher>,
    dead_letters: DeadLetterSink,
    analytics: AnalyticsQueue,
}

impl TelemetryProcessor {
    pub fn new(
        monitor: Arc<IngestionMonitor>,
        reconciler: Reconciler,
        publisher: Arc<dyn LiveUpdatePublisher>,
        dead_letters: DeadLetterSink,
        analytics: AnalyticsQueue,
    ) -> Self {
        Self {
            monitor,
            reconciler,
            publisher,
            dead_letters,
            analytics,
        }
    }

    /// Runs one raw message through the full pipeline. Never returns an
    /// error: every failure is accounted for here so the consumer loop can
    /// simply move to the next message.
    pub async fn process(&self, raw: &str) {
        let payload = match payload::parse_and_validate(raw) {
            Ok(payload) => payload,
            Err(reason) => {
                self.reject(raw, reason).await;
                return;
            }
        };

        let state = match self.reconciler.reconcile(raw, &payload).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, telemetry_id = %payload.telemetry_id,
                    "Failed to persist telemetry");
                self.dead_letters
                    .store(&format!("processing error: {e:#}"), raw)
                    .await;
                return;
            }
        };

        self.monitor.report_processed();

        let dto = VehicleStateDto::from(&state);
        if let Err(e) = self.publisher.publish(&dto).await {
            error!(error = %e, vehicle_id = dto.vehicle_id,
                "Failed to broadcast vehicle state update");
            self.dead_letters
                .store(&format!("live update broadcast failed: {e:#}"), raw)
                .await;
        }

        if let Err(e) = self.analytics.offer(dto) {
            warn!(error = %e, "Analytics enqueue failed");
            self.dead_letters
                .store(&format!("analytics enqueue failed: {e:#}"), raw)
                .await;
        }
    }

    async fn reject(&self, raw: &str, reason: RejectionReason) {
        match &reason {
            RejectionReason::Empty | RejectionReason::Validation(_) => {
                self.monitor.report_validation_failure();
            }
            RejectionReason::Deserialization(_) => {
                self.monitor.report_deserialization_failure();
            }
        }
        warn!(reason = %reason, "Rejected telemetry payload");
        self.dead_letters.store(&reason.to_string(), raw).await;
    }
}
