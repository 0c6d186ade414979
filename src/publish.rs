//! Live-update fan-out after a successful reconciliation.
//!
//! Dashboards consume a camelCase projection of the state row, not the
//! storage model. Delivery is best-effort: the state is already committed
//! when publishing runs, so a failed broadcast is dead-lettered by the
//! processor and never rolls the pipeline back.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::models::VehicleState;

/// Outward projection of a reconciled state row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStateDto {
    pub telemetry_id: String,
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
    pub stops_json: String,
}

impl From<&VehicleState> for VehicleStateDto {
    fn from(state: &VehicleState) -> Self {
        Self {
            telemetry_id: state.telemetry_id.clone(),
            vehicle_id: state.vehicle_id,
            vehicle_code: state.vehicle_code.clone(),
            number_plate: state.number_plate.clone(),
            fuel_type: state.fuel_type.clone(),
            fuel_unit: state.fuel_unit.clone(),
            fuel_capacity: state.fuel_capacity,
            fuel_level: state.fuel_level,
            fuel_level_percent: state.fuel_level_percent,
            fuel_consumption_per_100km: state.fuel_consumption_per_100km,
            odometer_km: state.odometer_km,
            co2_emission_kg: state.co2_emission_kg,
            route_id: state.route_id.clone(),
            route_summary: state.route_summary.clone(),
            route_distance_km: state.route_distance_km,
            base_speed_kmh: state.base_speed_kmh,
            timestamp_utc: state.timestamp_utc,
            status: state.status.clone(),
            latitude: state.latitude,
            longitude: state.longitude,
            speed_kmh: state.speed_kmh,
            heading_deg: state.heading_deg,
            distance_travelled_m: state.distance_travelled_m,
            distance_remaining_m: state.distance_remaining_m,
            progress: state.progress,
            eta_seconds: state.eta_seconds,
            stops_json: state.stops_json.clone(),
        }
    }
}

/// Delivery seam for reconciled vehicle states.
#[async_trait]
pub trait LiveUpdatePublisher: Send + Sync {
    async fn publish(&self, update: &VehicleStateDto) -> Result<()>;
}

/// Default publisher for runs without a realtime transport attached: logs
/// the update at debug level and reports success.
#[derive(Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl LiveUpdatePublisher for LoggingPublisher {
    async fn publish(&self, update: &VehicleStateDto) -> Result<()> {
        debug!(
            vehicle_id = update.vehicle_id,
            plate = %update.number_plate,
            progress = update.progress,
            "Vehicle state update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dto_serializes_with_camel_case_names() {
        let state = VehicleState {
            telemetry_id: "t-1".to_string(),
            vehicle_id: 7,
            number_plate: "AB12345".to_string(),
            fuel_level_percent: 62.5,
            ..VehicleState::default()
        };

        let json = serde_json::to_value(VehicleStateDto::from(&state)).unwrap();
        assert_eq!(json["telemetryId"], "t-1");
        assert_eq!(json["vehicleId"], 7);
        assert_eq!(json["numberPlate"], "AB12345");
        assert_eq!(json["fuelLevelPercent"], 62.5);
        assert!(json.get("telemetry_id").is_none());
    }

    #[tokio::test]
    async fn logging_publisher_always_succeeds() {
        let dto = VehicleStateDto::from(&VehicleState::default());
        assert!(LoggingPublisher.publish(&dto).await.is_ok());
    }
}
