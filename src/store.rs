//! Persistence boundary for the ingestion pipeline.
//!
//! The relational layer is an external collaborator; the pipeline only needs
//! the lookups and upserts below, composable into one atomic commit. The
//! bundled [`InMemoryStore`] backs tests and local runs.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{DeadLetter, RawMessage, Vehicle, VehicleState};

/// Upsert-capable store the reconciler and dead-letter sink write through.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn find_vehicle_by_external_id(&self, external_id: &str) -> Result<Option<Vehicle>>;

    async fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>>;

    /// Persists the vehicle, its state row, and the raw-message audit entry
    /// in a single unit of work: either all three commit or none do. Assigns
    /// a surrogate id to a new vehicle and stamps it onto the state row.
    async fn commit_reconciliation(
        &self,
        vehicle: Vehicle,
        state: VehicleState,
        raw: RawMessage,
    ) -> Result<VehicleState>;

    async fn append_dead_letter(&self, entry: DeadLetter) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    next_vehicle_id: u64,
    vehicles: HashMap<u64, Vehicle>,
    states: HashMap<u64, VehicleState>,
    raw_messages: Vec<RawMessage>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory store with the same atomicity shape as the relational layer:
/// the three reconciliation writes happen under one lock acquisition.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn vehicles(&self) -> Vec<Vehicle> {
        let tables = self.tables.lock().await;
        let mut vehicles: Vec<_> = tables.vehicles.values().cloned().collect();
        vehicles.sort_by_key(|v| v.id);
        vehicles
    }

    pub async fn state_for_vehicle(&self, vehicle_id: u64) -> Option<VehicleState> {
        self.tables.lock().await.states.get(&vehicle_id).cloned()
    }

    pub async fn raw_messages(&self) -> Vec<RawMessage> {
        self.tables.lock().await.raw_messages.clone()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.tables.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn find_vehicle_by_external_id(&self, external_id: &str) -> Result<Option<Vehicle>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .vehicles
            .values()
            .find(|v| v.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .vehicles
            .values()
            .find(|v| v.license_plate == plate)
            .cloned())
    }

    async fn commit_reconciliation(
        &self,
        mut vehicle: Vehicle,
        mut state: VehicleState,
        mut raw: RawMessage,
    ) -> Result<VehicleState> {
        let mut tables = self.tables.lock().await;

        if vehicle.id == 0 {
            tables.next_vehicle_id += 1;
            vehicle.id = tables.next_vehicle_id;
        }
        state.vehicle_id = vehicle.id;
        raw.vehicle_code = state.vehicle_code.clone();

        tables.vehicles.insert(vehicle.id, vehicle);
        tables.states.insert(state.vehicle_id, state.clone());
        tables.raw_messages.push(raw);

        Ok(state)
    }

    async fn append_dead_letter(&self, entry: DeadLetter) -> Result<()> {
        self.tables.lock().await.dead_letters.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(plate: &str, external_id: Option<&str>) -> Vehicle {
        Vehicle {
            license_plate: plate.to_string(),
            external_id: external_id.map(str::to_string),
            ..Vehicle::default()
        }
    }

    fn state(telemetry_id: &str) -> VehicleState {
        VehicleState {
            telemetry_id: telemetry_id.to_string(),
            ..VehicleState::default()
        }
    }

    fn raw(telemetry_id: &str) -> RawMessage {
        RawMessage {
            id: uuid::Uuid::new_v4(),
            telemetry_id: telemetry_id.to_string(),
            vehicle_code: String::new(),
            payload_json: "{}".to_string(),
            received_at_utc: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_assigns_ids_and_links_state() {
        let store = InMemoryStore::new();
        let state = store
            .commit_reconciliation(vehicle("AB12345", Some("V-1")), state("t-1"), raw("t-1"))
            .await
            .unwrap();

        assert_eq!(state.vehicle_id, 1);
        assert_eq!(store.vehicles().await.len(), 1);
        assert!(store.state_for_vehicle(1).await.is_some());
        assert_eq!(store.raw_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn lookups_match_external_id_then_plate() {
        let store = InMemoryStore::new();
        store
            .commit_reconciliation(vehicle("AB12345", Some("V-1")), state("t-1"), raw("t-1"))
            .await
            .unwrap();

        assert!(store.find_vehicle_by_external_id("V-1").await.unwrap().is_some());
        assert!(store.find_vehicle_by_external_id("V-2").await.unwrap().is_none());
        assert!(store.find_vehicle_by_plate("AB12345").await.unwrap().is_some());
        assert!(store.find_vehicle_by_plate("XX00000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recommit_replaces_state_instead_of_duplicating() {
        let store = InMemoryStore::new();
        let first = store
            .commit_reconciliation(vehicle("AB12345", Some("V-1")), state("t-1"), raw("t-1"))
            .await
            .unwrap();

        let mut existing = store.vehicles().await.remove(0);
        existing.speed_kmh = 50.0;
        let second = store
            .commit_reconciliation(existing, state("t-2"), raw("t-2"))
            .await
            .unwrap();

        assert_eq!(first.vehicle_id, second.vehicle_id);
        assert_eq!(store.vehicles().await.len(), 1);
        assert_eq!(store.raw_messages().await.len(), 2);
        assert_eq!(
            store.state_for_vehicle(first.vehicle_id).await.unwrap().telemetry_id,
            "t-2"
        );
    }
}
