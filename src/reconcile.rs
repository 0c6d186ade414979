//! Merges validated telemetry into the durable vehicle and state records.
//!
//! Lookup prefers the external vehicle id, falls back to the number plate,
//! and otherwise provisions a new vehicle. Identity fields are only ever
//! overwritten by non-empty incoming values; the odometer and travelled
//! distance are monotonic (`max(stored, incoming)`) because telemetry may be
//! replayed or arrive out of order. All other live-state fields are
//! authoritative and overwritten unconditionally. Vehicle, state row, and the
//! raw-message audit entry commit as one unit of work.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::models::{RawMessage, Vehicle, VehicleState};
use crate::payload::TelemetryPayload;
use crate::store::TelemetryStore;

const MAX_EXTERNAL_ID_LEN: usize = 64;
const MAX_PLATE_LEN: usize = 15;
const MAX_BRAND_LEN: usize = 64;
const MAX_VEHICLE_TYPE_LEN: usize = 100;
const MAX_FUEL_TYPE_LEN: usize = 50;
const MAX_FUEL_UNIT_LEN: usize = 16;
const MAX_ROUTE_ID_LEN: usize = 64;
const MAX_ROUTE_SUMMARY_LEN: usize = 256;
const MAX_STATUS_LEN: usize = 32;
const MAX_VEHICLE_CODE_LEN: usize = 32;
const MAX_STOPS_JSON_LEN: usize = 2048;

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TelemetryStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Upserts vehicle identity and latest-known state from a validated
    /// payload, appending the raw text as an audit row in the same commit.
    ///
    /// Storage failures propagate to the caller, which dead-letters the
    /// message and moves on.
    pub async fn reconcile(
        &self,
        raw_text: &str,
        payload: &TelemetryPayload,
    ) -> Result<VehicleState> {
        let received_at = Utc::now();
        let external_id = trim_to_len(&payload.vehicle_id, MAX_EXTERNAL_ID_LEN);
        let plate = trim_to_len(&payload.number_plate, MAX_PLATE_LEN).to_uppercase();
        let telemetry_at = payload.timestamp().unwrap_or(received_at);

        let existing = self.find_vehicle(&external_id, &plate).await?;
        let is_new = existing.is_none();

        let vehicle = match existing {
            Some(vehicle) => merge_vehicle(vehicle, payload, &external_id, &plate, telemetry_at),
            None => new_vehicle(payload, &external_id, &plate, telemetry_at, received_at),
        };

        let state = build_state(&vehicle, payload, &external_id, received_at, telemetry_at)?;
        let raw = RawMessage {
            id: Uuid::new_v4(),
            telemetry_id: trim_to_len(&payload.telemetry_id, 36),
            vehicle_code: state.vehicle_code.clone(),
            payload_json: raw_text.to_string(),
            received_at_utc: received_at,
        };

        let state = self
            .store
            .commit_reconciliation(vehicle, state, raw)
            .await
            .context("commit telemetry reconciliation")?;

        if is_new {
            info!(plate = %state.number_plate, vehicle_id = state.vehicle_id,
                "Provisioned vehicle from telemetry stream");
        }

        Ok(state)
    }

    async fn find_vehicle(&self, external_id: &str, plate: &str) -> Result<Option<Vehicle>> {
        if !external_id.is_empty() {
            if let Some(vehicle) = self.store.find_vehicle_by_external_id(external_id).await? {
                return Ok(Some(vehicle));
            }
        }
        if !plate.is_empty() {
            if let Some(vehicle) = self.store.find_vehicle_by_plate(plate).await? {
                return Ok(Some(vehicle));
            }
        }
        Ok(None)
    }
}

fn new_vehicle(
    payload: &TelemetryPayload,
    external_id: &str,
    plate: &str,
    telemetry_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vehicle {
    let brand = trim_to_len(&payload.brand, MAX_BRAND_LEN);
    Vehicle {
        id: 0,
        external_id: non_empty(external_id),
        license_plate: if plate.is_empty() {
            placeholder_plate()
        } else {
            plate.to_string()
        },
        vehicle_type: derive_vehicle_type(&payload.brand),
        brand,
        fuel_type: or_default(&trim_to_len(&payload.fuel_type, MAX_FUEL_TYPE_LEN), "unknown"),
        fuel_unit: trim_to_len(&payload.fuel_unit, MAX_FUEL_UNIT_LEN),
        fuel_tank_capacity: payload
            .fuel_capacity
            .or(payload.battery_capacity)
            .unwrap_or(0.0),
        battery_capacity: payload.battery_capacity,
        current_fuel_level: payload.fuel_level,
        fuel_level_percent: payload.fuel_level_percent,
        fuel_consumption_per_100km: payload.fuel_consumption_per_100km,
        kilometers_driven: payload.odometer_km,
        co2_emission_kg: payload.co2_emission_kg,
        latitude: payload.position.lat,
        longitude: payload.position.lon,
        speed_kmh: payload.speed_kmh,
        heading_deg: payload.heading_deg,
        distance_travelled_m: payload.distance_travelled_m,
        distance_remaining_m: payload.distance_remaining_m,
        progress: payload.progress,
        eta_seconds: payload.eta_seconds,
        route_id: trim_to_len(&payload.route_id, MAX_ROUTE_ID_LEN),
        route_summary: non_empty(&trim_to_len(&payload.route_summary, MAX_ROUTE_SUMMARY_LEN)),
        route_distance_km: payload.route_distance_km,
        base_speed_kmh: payload.base_speed_kmh,
        status: trim_to_len(&payload.status, MAX_STATUS_LEN),
        last_telemetry_at_utc: Some(telemetry_at),
        created_at_utc: Some(now),
        updated_at_utc: Some(now),
    }
}

fn merge_vehicle(
    mut vehicle: Vehicle,
    payload: &TelemetryPayload,
    external_id: &str,
    plate: &str,
    telemetry_at: DateTime<Utc>,
) -> Vehicle {
    // Identity fields: never blank out a known value with an absent one.
    if !external_id.is_empty() {
        vehicle.external_id = Some(external_id.to_string());
    }
    if !plate.is_empty() {
        vehicle.license_plate = plate.to_string();
    }
    if !payload.brand.trim().is_empty() {
        vehicle.brand = trim_to_len(&payload.brand, MAX_BRAND_LEN);
        if vehicle.vehicle_type.is_empty() || vehicle.vehicle_type.eq_ignore_ascii_case("Unknown") {
            vehicle.vehicle_type = derive_vehicle_type(&payload.brand);
        }
    }
    let fuel_type = trim_to_len(&payload.fuel_type, MAX_FUEL_TYPE_LEN);
    if !fuel_type.is_empty() {
        vehicle.fuel_type = fuel_type;
    }
    let fuel_unit = trim_to_len(&payload.fuel_unit, MAX_FUEL_UNIT_LEN);
    if !fuel_unit.is_empty() {
        vehicle.fuel_unit = fuel_unit;
    }
    if let Some(capacity) = payload.fuel_capacity.or(payload.battery_capacity) {
        if capacity >= 0.0 {
            vehicle.fuel_tank_capacity = capacity;
        }
    }
    if payload.battery_capacity.is_some() {
        vehicle.battery_capacity = payload.battery_capacity;
    }

    // Monotonic counters: replayed or out-of-order telemetry never moves
    // these backward.
    vehicle.kilometers_driven = vehicle.kilometers_driven.max(payload.odometer_km);
    vehicle.distance_travelled_m = vehicle.distance_travelled_m.max(payload.distance_travelled_m);

    // Live state: telemetry is authoritative, last processed wins.
    vehicle.current_fuel_level = payload.fuel_level;
    vehicle.fuel_level_percent = payload.fuel_level_percent;
    vehicle.fuel_consumption_per_100km = payload.fuel_consumption_per_100km;
    vehicle.co2_emission_kg = payload.co2_emission_kg;
    vehicle.latitude = payload.position.lat;
    vehicle.longitude = payload.position.lon;
    vehicle.speed_kmh = payload.speed_kmh;
    vehicle.heading_deg = payload.heading_deg;
    vehicle.distance_remaining_m = payload.distance_remaining_m;
    vehicle.progress = payload.progress;
    vehicle.eta_seconds = payload.eta_seconds;

    if !payload.route_id.trim().is_empty() {
        vehicle.route_id = trim_to_len(&payload.route_id, MAX_ROUTE_ID_LEN);
    }
    if !payload.route_summary.trim().is_empty() {
        vehicle.route_summary = Some(trim_to_len(&payload.route_summary, MAX_ROUTE_SUMMARY_LEN));
    }
    vehicle.route_distance_km = payload.route_distance_km;
    vehicle.base_speed_kmh = payload.base_speed_kmh;
    if !payload.status.trim().is_empty() {
        vehicle.status = trim_to_len(&payload.status, MAX_STATUS_LEN);
    }

    vehicle.last_telemetry_at_utc = Some(telemetry_at);
    vehicle.updated_at_utc = Some(Utc::now());
    vehicle
}

fn build_state(
    vehicle: &Vehicle,
    payload: &TelemetryPayload,
    external_id: &str,
    received_at: DateTime<Utc>,
    telemetry_at: DateTime<Utc>,
) -> Result<VehicleState> {
    let stops_json = serde_json::to_string(&payload.stops).context("serialize route stops")?;

    Ok(VehicleState {
        telemetry_id: trim_to_len(&payload.telemetry_id, 36),
        vehicle_id: vehicle.id,
        vehicle_code: trim_to_len(external_id, MAX_VEHICLE_CODE_LEN),
        number_plate: vehicle.license_plate.clone(),
        fuel_type: vehicle.fuel_type.clone(),
        fuel_unit: vehicle.fuel_unit.clone(),
        fuel_capacity: vehicle.fuel_tank_capacity,
        fuel_level: payload.fuel_level,
        fuel_level_percent: payload.fuel_level_percent,
        fuel_consumption_per_100km: payload.fuel_consumption_per_100km,
        odometer_km: vehicle.kilometers_driven,
        co2_emission_kg: payload.co2_emission_kg,
        route_id: trim_to_len(&payload.route_id, MAX_ROUTE_ID_LEN),
        route_summary: trim_to_len(&payload.route_summary, MAX_ROUTE_SUMMARY_LEN),
        route_distance_km: payload.route_distance_km,
        base_speed_kmh: payload.base_speed_kmh,
        timestamp_utc: telemetry_at,
        status: trim_to_len(&payload.status, MAX_STATUS_LEN),
        latitude: payload.position.lat,
        longitude: payload.position.lon,
        speed_kmh: payload.speed_kmh,
        heading_deg: payload.heading_deg,
        distance_travelled_m: vehicle.distance_travelled_m,
        distance_remaining_m: payload.distance_remaining_m,
        progress: payload.progress,
        eta_seconds: payload.eta_seconds,
        stops_json: bound_len(stops_json, MAX_STOPS_JSON_LEN),
        updated_at_utc: received_at,
    })
}

fn derive_vehicle_type(brand: &str) -> String {
    if brand.trim().is_empty() {
        "Unknown".to_string()
    } else {
        trim_to_len(brand, MAX_VEHICLE_TYPE_LEN)
    }
}

fn placeholder_plate() -> String {
    let generated = format!("AUTO-{}", Uuid::new_v4().simple());
    bound_len(generated, MAX_PLATE_LEN).to_uppercase()
}

fn trim_to_len(value: &str, max_len: usize) -> String {
    bound_len(value.trim().to_string(), max_len)
}

fn bound_len(value: String, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value
    } else {
        value.chars().take(max_len).collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
