//! Wire-level telemetry payload and its codec/validator.
//!
//! Payloads arrive as UTF-8 JSON with snake_case field names. Parsing and
//! semantic validation are separate failure categories: a malformed document
//! is a [`RejectionReason::Deserialization`], while a well-formed document
//! that violates an invariant is a [`RejectionReason::Validation`] carrying
//! every violated rule, not just the first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a raw message was rejected before reaching persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("telemetry payload is empty")]
    Empty,
    #[error("json parsing error: {0}")]
    Deserialization(String),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// A single structured report of a vehicle's live status, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryPayload {
    pub telemetry_id: String,
    pub vehicle_id: String,
    pub number_plate: String,
    #[serde(default)]
    pub brand: String,
    pub fuel_type: String,
    pub fuel_unit: String,
    #[serde(default)]
    pub fuel_capacity: Option<f64>,
    #[serde(default)]
    pub battery_capacity: Option<f64>,
    pub fuel_level: f64,
    pub fuel_level_percent: f64,
    pub fuel_consumption_per_100km: f64,
    pub odometer_km: f64,
    pub co2_emission_kg: f64,
    pub route_id: String,
    #[serde(default)]
    pub route_summary: String,
    pub route_distance_km: f64,
    pub base_speed_kmh: f64,
    pub timestamp_utc: String,
    pub status: String,
    pub position: TelemetryPosition,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub distance_travelled_m: f64,
    pub distance_remaining_m: f64,
    pub progress: f64,
    pub eta_seconds: f64,
    pub stops: Vec<TelemetryStop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TelemetryPosition {
    pub lat: f64,
    pub lon: f64,
}

/// A named stop along the assigned route.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelemetryStop {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl TelemetryPayload {
    /// The payload timestamp as a UTC instant, if the wire string parses.
    ///
    /// Validation guarantees this succeeds for accepted payloads; callers
    /// that want a fallback should pair it with the receive time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp_utc)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Parses a raw message into a validated [`TelemetryPayload`].
///
/// An empty or all-whitespace message is rejected before any parse attempt.
/// Semantic checks aggregate every violated invariant into one rejection.
pub fn parse_and_validate(raw: &str) -> Result<TelemetryPayload, RejectionReason> {
    if raw.trim().is_empty() {
        return Err(RejectionReason::Empty);
    }

    let payload: TelemetryPayload = serde_json::from_str(raw)
        .map_err(|e| RejectionReason::Deserialization(e.to_string()))?;

    let errors = validate(&payload);
    if errors.is_empty() {
        Ok(payload)
    } else {
        Err(RejectionReason::Validation(errors))
    }
}

fn validate(payload: &TelemetryPayload) -> Vec<String> {
    let mut errors = Vec::new();

    if !(0.0..=1.0).contains(&payload.progress) {
        errors.push("progress must be between 0 and 1".to_string());
    }

    if !(0.0..=100.0).contains(&payload.fuel_level_percent) {
        errors.push("fuel_level_percent must be between 0 and 100".to_string());
    }

    if payload.stops.len() < 2 {
        errors.push("stops must include at least two entries".to_string());
    }

    if let Some(error) = validate_timestamp(&payload.timestamp_utc) {
        errors.push(error);
    }

    errors
}

fn validate_timestamp(timestamp: &str) -> Option<String> {
    if timestamp.trim().is_empty() {
        return Some("timestamp_utc cannot be empty".to_string());
    }

    match DateTime::parse_from_rfc3339(timestamp) {
        Err(_) => Some("timestamp_utc is not a valid ISO 8601 timestamp".to_string()),
        // Policy: the instant must be expressed with a zero UTC offset. A
        // correctly formatted non-zero offset is rejected, not converted.
        Ok(parsed) if parsed.offset().local_minus_utc() != 0 => {
            Some("timestamp_utc must be expressed in UTC (e.g. end with 'Z')".to_string())
        }
        Ok(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "telemetry_id": "t-1",
            "vehicle_id": "V-1",
            "number_plate": "AB12345",
            "brand": "Volvo",
            "fuel_type": "diesel",
            "fuel_unit": "l",
            "fuel_capacity": 400.0,
            "fuel_level": 250.0,
            "fuel_level_percent": 62.5,
            "fuel_consumption_per_100km": 28.0,
            "odometer_km": 120_000.5,
            "co2_emission_kg": 84_000.0,
            "route_id": "R-7",
            "route_summary": "Oslo - Bergen",
            "route_distance_km": 463.0,
            "base_speed_kmh": 80.0,
            "timestamp_utc": "2024-01-01T00:00:00Z",
            "status": "en-route",
            "position": { "lat": 60.39, "lon": 5.32 },
            "speed_kmh": 72.0,
            "heading_deg": 270.0,
            "distance_travelled_m": 231_500.0,
            "distance_remaining_m": 231_500.0,
            "progress": 0.5,
            "eta_seconds": 11_600.0,
            "stops": [
                { "name": "Oslo", "lat": 59.91, "lon": 10.75 },
                { "name": "Bergen", "lat": 60.39, "lon": 5.32 }
            ]
        })
    }

    #[test]
    fn accepts_valid_payload() {
        let raw = sample_json().to_string();
        let payload = parse_and_validate(&raw).unwrap();
        assert_eq!(payload.vehicle_id, "V-1");
        assert_eq!(payload.stops.len(), 2);
        assert!(payload.timestamp().is_some());
    }

    #[test]
    fn empty_payload_is_rejected_before_parsing() {
        assert_eq!(parse_and_validate(""), Err(RejectionReason::Empty));
        assert_eq!(parse_and_validate("   \n\t"), Err(RejectionReason::Empty));
    }

    #[test]
    fn malformed_json_is_a_deserialization_failure() {
        let err = parse_and_validate("{not json").unwrap_err();
        assert!(matches!(err, RejectionReason::Deserialization(_)));
    }

    #[test]
    fn missing_required_field_is_a_deserialization_failure() {
        let mut doc = sample_json();
        doc.as_object_mut().unwrap().remove("vehicle_id");
        let err = parse_and_validate(&doc.to_string()).unwrap_err();
        match err {
            RejectionReason::Deserialization(msg) => assert!(msg.contains("vehicle_id")),
            other => panic!("expected deserialization failure, got {other:?}"),
        }
    }

    #[test]
    fn validation_aggregates_every_violation() {
        let mut doc = sample_json();
        doc["progress"] = serde_json::json!(1.5);
        doc["fuel_level_percent"] = serde_json::json!(120.0);
        doc["stops"] = serde_json::json!([{ "name": "Oslo", "lat": 59.91, "lon": 10.75 }]);
        doc["timestamp_utc"] = serde_json::json!("not-a-timestamp");

        let err = parse_and_validate(&doc.to_string()).unwrap_err();
        match err {
            RejectionReason::Validation(errors) => {
                assert_eq!(errors.len(), 4);
                assert!(errors[0].contains("progress"));
                assert!(errors[1].contains("fuel_level_percent"));
                assert!(errors[2].contains("stops"));
                assert!(errors[3].contains("timestamp_utc"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn non_zero_offset_timestamp_is_rejected() {
        let mut doc = sample_json();
        doc["timestamp_utc"] = serde_json::json!("2024-01-01T00:00:00+02:00");
        let err = parse_and_validate(&doc.to_string()).unwrap_err();
        match err {
            RejectionReason::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("UTC"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn explicit_zero_offset_variants_are_accepted() {
        for ts in ["2024-01-01T00:00:00Z", "2024-01-01T00:00:00+00:00"] {
            let mut doc = sample_json();
            doc["timestamp_utc"] = serde_json::json!(ts);
            assert!(parse_and_validate(&doc.to_string()).is_ok(), "{ts} should be valid");
        }
    }

    #[test]
    fn progress_boundaries_are_inclusive() {
        for progress in [0.0, 1.0] {
            let mut doc = sample_json();
            doc["progress"] = serde_json::json!(progress);
            assert!(parse_and_validate(&doc.to_string()).is_ok());
        }
    }

    #[test]
    fn rejection_reason_renders_joined_message() {
        let reason = RejectionReason::Validation(vec![
            "progress must be between 0 and 1".to_string(),
            "stops must include at least two entries".to_string(),
        ]);
        assert_eq!(
            reason.to_string(),
            "validation failed: progress must be between 0 and 1; stops must include at least two entries"
        );
    }
}
