//! Emits the periodic heartbeat from the cached device status row, plus
//! immediate heartbeats when another actor changes visible state.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::persistence::{ConnectionStatus, DeploymentConfig, Store};

use super::messages::{ActorName, HeartbeatStatus, Message, Payload};
use super::registry::MailboxRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct HeartbeatActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    identity: DeploymentConfig,
    cancel: CancellationToken,
}

impl HeartbeatActor {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        store: Store,
        identity: DeploymentConfig,
        cancel: CancellationToken,
    ) -> Self {
        HeartbeatActor {
            registry,
            store,
            identity,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!(
            "HeartbeatActor started for device {}",
            self.identity.device_id
        );
        let mailbox = self.registry.mailbox(ActorName::Heartbeat)?;
        let mut rx = mailbox.lock().await;

        let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => self.send_heartbeat().await,
                message = rx.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    self.handle_message(message).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        match message.payload {
            Payload::ForceHeartbeatRequest(trigger) => {
                info!("Force heartbeat requested: {}", trigger.reason);
                self.send_heartbeat().await;
            }
            other => {
                warn!("[HeartbeatActor] Unhandled message type: {}", other.kind());
            }
        }
    }

    async fn send_heartbeat(&self) {
        let payload = self.collect_heartbeat().await;
        if let Err(e) = self
            .registry
            .send_from(
                ActorName::Heartbeat,
                ActorName::Mqtt,
                Payload::HeartbeatStatus(payload),
            )
            .await
        {
            error!("Failed to hand heartbeat to MQTT actor: {e}");
        }
    }

    /// Snapshot of the status row; on any failure a minimal payload marking
    /// both connections errored goes out instead.
    async fn collect_heartbeat(&self) -> HeartbeatStatus {
        match self.store.latest_device_status(&self.identity.device_id).await {
            Ok(Some(status)) => HeartbeatStatus {
                cpu_usage_percent: status.cpu_usage_percent,
                memory_usage_percent: status.memory_usage_percent,
                disk_usage_percent: status.disk_usage_percent,
                temperature_celsius: status.temperature_celsius,
                uptime_seconds: status.uptime_seconds,
                load_average: status.load_average,
                monitoring_status: status.monitoring_status,
                mqtt_connection_status: status.mqtt_connection_status,
                bacnet_connection_status: status.bacnet_connection_status,
                bacnet_devices_connected: status.bacnet_devices_connected,
                bacnet_points_monitored: status.bacnet_points_monitored,
            },
            Ok(None) => {
                warn!(
                    "No status record found for device {}",
                    self.identity.device_id
                );
                HeartbeatStatus::default()
            }
            Err(e) => {
                error!("Error collecting heartbeat data: {e}");
                HeartbeatStatus {
                    mqtt_connection_status: Some(ConnectionStatus::Error),
                    bacnet_connection_status: Some(ConnectionStatus::Error),
                    ..HeartbeatStatus::default()
                }
            }
        }
    }
}
