//! Secondary analytics fan-out.
//!
//! Reconciled states are offered to a bounded channel that a background
//! worker drains. Analytics is strictly best-effort: a full channel never
//! slows ingestion, it surfaces as an enqueue error the caller records.

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::publish::VehicleStateDto;

#[derive(Clone)]
pub struct AnalyticsQueue {
    tx: mpsc::Sender<VehicleStateDto>,
}

impl AnalyticsQueue {
    /// Creates the queue and its receiving half.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<VehicleStateDto>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Offers an update without waiting. Fails when the worker is behind or
    /// gone; the update is not retried.
    pub fn offer(&self, update: VehicleStateDto) -> Result<()> {
        self.tx.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("analytics queue is full"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("analytics worker has stopped"),
        })
    }
}

/// Spawns the drain loop. The task ends when every queue handle is dropped.
pub fn spawn_worker(mut rx: mpsc::Receiver<VehicleStateDto>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            debug!(
                vehicle_id = update.vehicle_id,
                plate = %update.number_plate,
                odometer_km = update.odometer_km,
                fuel_level_percent = update.fuel_level_percent,
                "Analytics sample"
            );
        }
        info!("Analytics worker drained and stopped");
    })
}
