//! Broker connection management and the bounded ingestion queue.
//!
//! One task owns the MQTT event loop and feeds raw payloads into a bounded
//! channel; a single consumer task drains the channel through the
//! [`TelemetryProcessor`], which preserves arrival order per connection.
//! When the consumer falls behind, the producer awaits channel capacity
//! rather than dropping messages, which pushes backpressure onto the broker
//! session.
//!
//! Reconnects use capped exponential backoff. A last-will message marks the
//! backend offline if the session dies without a clean disconnect; the same
//! payload is published explicitly during graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rumqttc::{
    AsyncClient, Event, LastWill, MqttOptions, NetworkOptions, Packet, QoS, Transport,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::monitor::IngestionMonitor;
use crate::processor::TelemetryProcessor;

const EVENT_LOOP_CAPACITY: usize = 64;
const ONLINE_STATUS_PAYLOAD: &str = "online";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect delay for the given 1-based attempt: the base doubles each
/// attempt and never exceeds the cap.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

pub struct IngestionService {
    config: MqttConfig,
    monitor: Arc<IngestionMonitor>,
    processor: Arc<TelemetryProcessor>,
}

impl IngestionService {
    pub fn new(
        config: MqttConfig,
        monitor: Arc<IngestionMonitor>,
        processor: Arc<TelemetryProcessor>,
    ) -> Self {
        Self {
            config,
            monitor,
            processor,
        }
    }

    /// Runs until the shutdown signal flips to `true`. Tears down in order:
    /// unsubscribe, announce offline, disconnect, then drain the queue.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<String>(self.config.queue_capacity);

        let processor = Arc::clone(&self.processor);
        let consumer = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                processor.process(&raw).await;
            }
        });

        let (client, mut event_loop) = self.connect()?;
        let mut fatal: Option<anyhow::Error> = None;
        let mut attempt: u32 = 0;
        let mut last_activity = Instant::now();
        let mut inactivity_ticker = tokio::time::interval(self.config.inactivity_warning);
        inactivity_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = inactivity_ticker.tick() => {
                    if self.monitor.snapshot().connected
                        && last_activity.elapsed() >= self.config.inactivity_warning
                    {
                        warn!(
                            idle_seconds = last_activity.elapsed().as_secs(),
                            topic = %self.config.telemetry_topic,
                            "No telemetry received recently"
                        );
                    }
                }
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host = %self.config.host, port = self.config.port,
                            "Connected to MQTT broker");
                        attempt = 0;
                        last_activity = Instant::now();
                        self.monitor.report_connected();
                        // Without the subscription there is no pipeline, so
                        // this is the one failure that stops the service.
                        if let Err(e) = client
                            .subscribe(&self.config.telemetry_topic, QoS::AtLeastOnce)
                            .await
                        {
                            error!(error = %e, topic = %self.config.telemetry_topic,
                                "Failed to subscribe to telemetry topic");
                            fatal = Some(
                                anyhow::Error::new(e).context("subscribe to telemetry topic"),
                            );
                            break;
                        }
                        if let Err(e) = client
                            .publish(
                                &self.config.status_topic,
                                QoS::AtLeastOnce,
                                false,
                                ONLINE_STATUS_PAYLOAD,
                            )
                            .await
                        {
                            warn!(error = %e, "Failed to announce online status");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        last_activity = Instant::now();
                        self.monitor.report_message_received();
                        // No payload bytes at all is a transport anomaly, not
                        // a rejectable message.
                        if publish.payload.is_empty() {
                            warn!(topic = %publish.topic, "Dropping message with no payload bytes");
                            continue;
                        }
                        let raw = String::from_utf8_lossy(&publish.payload).into_owned();
                        // Awaiting capacity here is the backpressure point.
                        if tx.send(raw).await.is_err() {
                            error!("Ingestion queue consumer stopped unexpectedly");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.monitor.report_disconnected("server initiated disconnect");
                        warn!("Broker requested disconnect");
                    }
                    Ok(event) => {
                        debug!(?event, "MQTT event");
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.monitor.report_disconnected(&reason);
                        attempt = attempt.saturating_add(1);
                        let delay = backoff_delay(
                            attempt,
                            self.config.reconnect_base,
                            self.config.reconnect_max,
                        );
                        warn!(error = %reason, attempt, delay_seconds = delay.as_secs(),
                            "MQTT connection lost, retrying");
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = sleep(delay) => {}
                        }
                    }
                },
            }
        }

        info!("Stopping telemetry ingestion");
        if let Err(e) = client.unsubscribe(&self.config.telemetry_topic).await {
            debug!(error = %e, "Unsubscribe on shutdown failed");
        }
        if let Err(e) = client
            .publish(
                &self.config.status_topic,
                QoS::AtLeastOnce,
                false,
                self.config.offline_will_payload.as_str(),
            )
            .await
        {
            debug!(error = %e, "Offline status publish on shutdown failed");
        }
        if let Err(e) = client.disconnect().await {
            debug!(error = %e, "Disconnect on shutdown failed");
        }
        self.monitor.report_disconnected("shutdown requested");

        // Closing the producer lets the consumer finish buffered messages.
        drop(tx);
        if timeout(DRAIN_TIMEOUT, consumer).await.is_err() {
            warn!("Timed out draining the ingestion queue on shutdown");
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn connect(&self) -> Result<(AsyncClient, rumqttc::EventLoop)> {
        let client_id = format!("fleet-telemetry-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_last_will(LastWill::new(
            &self.config.status_topic,
            self.config.offline_will_payload.clone(),
            QoS::AtLeastOnce,
            false,
        ));
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.clone(),
                self.config.password.clone().unwrap_or_default(),
            );
        }
        if self.config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(options, EVENT_LOOP_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.config.connection_timeout.as_secs());
        event_loop.set_network_options(network_options);
        Ok((client, event_loop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_the_base() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, base, max), Duration::from_secs(16));
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(6, base, max), Duration::from_secs(30));
        assert_eq!(backoff_delay(100, base, max), Duration::from_secs(30));
    }

    #[test]
    fn backoff_handles_attempt_zero() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, base, max), Duration::from_secs(2));
    }
}
