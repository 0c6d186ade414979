//! Runtime configuration, loaded from the environment.
//!
//! Values come from process environment variables, with `.env` files loaded
//! by the binary before this runs. Every knob has a default suited to a
//! local broker; a malformed override is an error rather than a silent
//! fallback.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive: Duration,
    pub connection_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub inactivity_warning: Duration,
    pub queue_capacity: usize,
    pub telemetry_topic: String,
    pub status_topic: String,
    pub offline_will_payload: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub analytics_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mqtt: MqttConfig::from_env()?,
            analytics_queue_capacity: parsed_var("ANALYTICS_QUEUE_CAPACITY", 512)?,
        })
    }
}

impl MqttConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parsed_var("MQTT_ENABLED", true)?,
            host: string_var("MQTT_HOST", "localhost"),
            port: parsed_var("MQTT_PORT", 1883)?,
            username: optional_var("MQTT_USERNAME"),
            password: optional_var("MQTT_PASSWORD"),
            use_tls: parsed_var("MQTT_USE_TLS", false)?,
            keep_alive: duration_var("MQTT_KEEP_ALIVE_SECONDS", 30)?,
            connection_timeout: duration_var("MQTT_CONNECTION_TIMEOUT_SECONDS", 10)?,
            reconnect_base: duration_var("MQTT_RECONNECT_BASE_SECONDS", 1)?,
            reconnect_max: duration_var("MQTT_RECONNECT_MAX_SECONDS", 30)?,
            inactivity_warning: duration_var("MQTT_INACTIVITY_WARNING_SECONDS", 30)?,
            queue_capacity: parsed_var("MQTT_QUEUE_CAPACITY", 256)?,
            telemetry_topic: string_var("MQTT_TELEMETRY_TOPIC", "fleet/telemetry"),
            status_topic: string_var("MQTT_STATUS_TOPIC", "fleet/telemetry/backend-status"),
            offline_will_payload: string_var("MQTT_OFFLINE_WILL_PAYLOAD", "offline"),
        })
    }
}

fn string_var(name: &str, default: &str) -> String {
    optional_var(name).unwrap_or_else(|| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        None => Ok(default),
    }
}

fn duration_var(name: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parsed_var(name, default_secs)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate shared process state, so each uses distinct names.

    #[test]
    fn defaults_target_a_local_broker() {
        let config = MqttConfig::from_env().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert!(config.enabled);
        assert!(!config.use_tls);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_max, Duration::from_secs(30));
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.telemetry_topic, "fleet/telemetry");
        assert_eq!(config.status_topic, "fleet/telemetry/backend-status");
        assert_eq!(config.offline_will_payload, "offline");
        assert!(config.username.is_none());
    }

    #[test]
    fn malformed_numeric_override_is_an_error() {
        unsafe { env::set_var("MQTT_PORT_TEST_BAD", "not-a-port") };
        let result: Result<u16> = parsed_var("MQTT_PORT_TEST_BAD", 1883);
        unsafe { env::remove_var("MQTT_PORT_TEST_BAD") };
        assert!(result.is_err());
    }

    #[test]
    fn blank_override_falls_back_to_default() {
        unsafe { env::set_var("MQTT_HOST_TEST_BLANK", "   ") };
        assert_eq!(string_var("MQTT_HOST_TEST_BLANK", "localhost"), "localhost");
        unsafe { env::remove_var("MQTT_HOST_TEST_BLANK") };
    }
}
