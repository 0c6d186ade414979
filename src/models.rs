//! Durable records produced by the ingestion pipeline.
//!
//! `Vehicle` and `VehicleState` are mutable rows upserted by the reconciler;
//! `RawMessage` and `DeadLetter` are append-only and never touched again
//! after insertion.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Durable vehicle identity plus its latest live-state snapshot.
///
/// `kilometers_driven` and `distance_travelled_m` are monotonic counters:
/// the reconciler only ever moves them forward, so replayed or out-of-order
/// telemetry cannot roll them back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vehicle {
    /// Surrogate key; 0 until the store assigns one.
    pub id: u64,
    pub external_id: Option<String>,
    pub license_plate: String,
    pub vehicle_type: String,
    pub brand: String,
    pub fuel_type: String,
    pub fuel_unit: String,
    pub fuel_tank_capacity: f64,
    pub battery_capacity: Option<f64>,
    pub current_fuel_level: f64,
    pub fuel_level_percent: f64,
    pub fuel_consumption_per_100km: f64,
    pub kilometers_driven: f64,
    pub co2_emission_kg: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub distance_travelled_m: f64,
    pub distance_remaining_m: f64,
    pub progress: f64,
    pub eta_seconds: f64,
    pub route_id: String,
    pub route_summary: Option<String>,
    pub route_distance_km: f64,
    pub base_speed_kmh: f64,
    pub status: String,
    pub last_telemetry_at_utc: Option<DateTime<Utc>>,
    pub created_at_utc: Option<DateTime<Utc>>,
    pub updated_at_utc: Option<DateTime<Utc>>,
}

/// Latest fully-reconciled snapshot for dashboard reads, 1:1 with a vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub telemetry_id: String,
    /// Matches `Vehicle::id`; unique per vehicle.
    pub vehicle_id: u64,
    pub vehicle_code: String,
    pub number_plate: String,
    pub fuel_type: String,
    pub fuel_unit: String,
    pub fuel_capacity: f64,
    pub fuel_level: f64,
    pub fuel_level_percent: f64,
    pub fuel_consumption_per_100km: f64,
    pub odometer_km: f64,
    pub co2_emission_kg: f64,
    pub route_id: String,
    pub route_summary: String,
    pub route_distance_km: f64,
    pub base_speed_kmh: f64,
    pub timestamp_utc: DateTime<Utc>,
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub distance_travelled_m: f64,
    pub distance_remaining_m: f64,
    pub progress: f64,
    pub eta_seconds: f64,
    /// Serialized stop list, bounded to the column width.
    pub stops_json: String,
    pub updated_at_utc: DateTime<Utc>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            telemetry_id: String::new(),
            vehicle_id: 0,
            vehicle_code: String::new(),
            number_plate: String::new(),
            fuel_type: String::new(),
            fuel_unit: String::new(),
            fuel_capacity: 0.0,
            fuel_level: 0.0,
            fuel_level_percent: 0.0,
            fuel_consumption_per_100km: 0.0,
            odometer_km: 0.0,
            co2_emission_kg: 0.0,
            route_id: String::new(),
            route_summary: String::new(),
            route_distance_km: 0.0,
            base_speed_kmh: 0.0,
            timestamp_utc: DateTime::UNIX_EPOCH,
            status: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            distance_travelled_m: 0.0,
            distance_remaining_m: 0.0,
            progress: 0.0,
            eta_seconds: 0.0,
            stops_json: String::new(),
            updated_at_utc: DateTime::UNIX_EPOCH,
        }
    }
}

/// Audit copy of every accepted payload, verbatim.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: Uuid,
    pub telemetry_id: String,
    pub vehicle_code: String,
    pub payload_json: String,
    pub received_at_utc: DateTime<Utc>,
}

/// A rejected or undeliverable payload retained for diagnosis.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub reason: String,
    pub payload_json: String,
    pub created_at_utc: DateTime<Utc>,
}
