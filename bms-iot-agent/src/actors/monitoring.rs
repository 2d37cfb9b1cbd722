//! The BACnet monitoring actor: a message-handler loop and a poll loop
//! running concurrently over shared flags. Reconfiguration pauses polling,
//! swaps the reader pool and inventory, and then restores the previous
//! monitoring state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{debug, error, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::bacnet::{PollEngine, ReaderConfig, ReaderPool};
use crate::persistence::{
    ConnectionStatus, DeploymentConfig, DeviceStatusUpdate, MonitoringStatus, Store,
};

use super::messages::{
    ActorName, ConfigUploadRequest, ConfigUploadResponse, Message, MonitoringControl,
    MonitoringControlResponse, Payload, Trigger,
};
use super::registry::MailboxRegistry;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct MonitoringActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    pool: Arc<ReaderPool>,
    engine: PollEngine,
    identity: DeploymentConfig,
    monitoring_enabled: AtomicBool,
    monitor_initialized: AtomicBool,
    cancel: CancellationToken,
}

impl MonitoringActor {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        store: Store,
        pool: Arc<ReaderPool>,
        identity: DeploymentConfig,
        cancel: CancellationToken,
    ) -> Self {
        let engine = PollEngine::new(store.clone(), pool.clone());
        MonitoringActor {
            registry,
            store,
            pool,
            engine,
            identity,
            monitoring_enabled: AtomicBool::new(true),
            monitor_initialized: AtomicBool::new(false),
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!("BACnet monitoring actor started, waiting for configuration");

        let status = self
            .store
            .latest_device_status(&self.identity.device_id)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "no monitoring status found for device {}",
                    self.identity.device_id
                )
            })?;
        self.monitoring_enabled.store(
            status.monitoring_status == Some(MonitoringStatus::Active),
            Ordering::SeqCst,
        );

        self.load_readers_from_store().await;
        info!(
            "Monitoring enabled: {}, monitor initialized: {}",
            self.monitoring_enabled.load(Ordering::SeqCst),
            self.monitor_initialized.load(Ordering::SeqCst)
        );

        let (message_loop, poll_loop) =
            tokio::join!(self.message_loop(), self.poll_loop());
        message_loop?;
        poll_loop?;
        Ok(())
    }

    /// Restores the pool from the last saved reader set; monitoring itself
    /// stays gated on the persisted monitoring status.
    async fn load_readers_from_store(&self) {
        match self.store.bacnet_readers(&self.identity.device_id).await {
            Ok(readers) if !readers.is_empty() => {
                info!("Loaded {} BACnet readers from the store", readers.len());
                let connected = self.pool.initialize(&readers).await;
                self.persist_reader_states(&readers, &connected).await;
                self.monitor_initialized.store(true, Ordering::SeqCst);
            }
            Ok(_) => {
                info!("No saved BACnet readers found, waiting for configuration upload");
            }
            Err(e) => {
                warn!("Failed to load BACnet readers from the store: {e}");
                info!("Waiting for configuration upload instead");
            }
        }
    }

    async fn message_loop(&self) -> anyhow::Result<()> {
        debug!("Message handler loop started");
        let mailbox = self.registry.mailbox(ActorName::Bacnet)?;
        let mut rx = mailbox.lock().await;

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                message = rx.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    self.handle_message(message).await;
                }
            }
        }
    }

    async fn poll_loop(&self) -> anyhow::Result<()> {
        debug!("Poll loop started");
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    if !(self.monitoring_enabled.load(Ordering::SeqCst)
                        && self.monitor_initialized.load(Ordering::SeqCst))
                    {
                        continue;
                    }

                    match self.engine.poll_all_devices().await {
                        Ok(summary) => {
                            self.update_bacnet_status(
                                summary.controllers as i64,
                                summary.points_sampled as i64,
                            )
                            .await;
                        }
                        Err(e) => {
                            error!("BACnet poll sweep failed: {e}");
                            self.update_bacnet_connection(ConnectionStatus::Error).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        debug!("[MonitoringActor] received {}", message.payload.kind());
        match message.payload {
            Payload::ConfigUploadRequest(request) => {
                self.handle_config_upload(request).await;
            }
            Payload::StartMonitoringRequest(command) => {
                self.handle_start_monitoring(command, message.sender).await;
            }
            Payload::StopMonitoringRequest(command) => {
                self.handle_stop_monitoring(command, message.sender).await;
            }
            other => {
                warn!("[MonitoringActor] Unhandled message type: {}", other.kind());
            }
        }
    }

    /// Pauses polling, applies the new configuration, and restores the
    /// previous monitoring state on failure. A response is emitted towards
    /// the uploader regardless of the outcome.
    async fn handle_config_upload(&self, request: ConfigUploadRequest) {
        info!(
            "Handling configuration upload with {} controllers and {} readers",
            request.iot_device_controllers.len(),
            request.bacnet_readers.len()
        );

        let old_enabled = self.monitoring_enabled.swap(false, Ordering::SeqCst);
        let old_initialized = self.monitor_initialized.swap(false, Ordering::SeqCst);
        info!("Paused monitoring while the configuration upload is processed");

        let result = self.apply_config(&request, old_enabled).await;
        if let Err(e) = &result {
            error!("Error during configuration upload processing: {e:?}");
            self.monitoring_enabled.store(old_enabled, Ordering::SeqCst);
            self.monitor_initialized
                .store(old_initialized, Ordering::SeqCst);
            warn!(
                "Restored previous monitoring state: enabled={old_enabled}, initialized={old_initialized}"
            );
            self.update_monitoring_status(MonitoringStatus::Error).await;
        }

        let response = Payload::ConfigUploadResponse(ConfigUploadResponse {
            success: result.is_ok(),
            request: Some(Box::new(request)),
        });
        if let Err(e) = self
            .registry
            .send_from(ActorName::Bacnet, ActorName::Uploader, response)
            .await
        {
            error!("Could not send configuration upload response: {e}");
        }
    }

    async fn apply_config(
        &self,
        request: &ConfigUploadRequest,
        old_enabled: bool,
    ) -> anyhow::Result<()> {
        if request.bacnet_readers.is_empty() {
            warn!("No BACnet readers provided in config, monitoring will be disabled");
            self.monitoring_enabled.store(false, Ordering::SeqCst);
            self.update_monitoring_status(MonitoringStatus::Stopped)
                .await;
        } else {
            if let Err(e) = self
                .store
                .save_bacnet_readers(&self.identity.device_id, &request.bacnet_readers)
                .await
            {
                warn!("Failed to save BACnet readers to the store: {e}");
            }

            let connected = self.pool.initialize(&request.bacnet_readers).await;
            self.persist_reader_states(&request.bacnet_readers, &connected)
                .await;
            self.monitor_initialized.store(true, Ordering::SeqCst);
            info!("BACnet monitor initialized with the uploaded reader configuration");

            if old_enabled {
                self.monitoring_enabled.store(true, Ordering::SeqCst);
                info!("Resumed monitoring after configuration upload");
            } else {
                info!("Monitoring stays disabled, as it was before the upload");
            }
        }

        let reachable = self
            .engine
            .refresh_inventory(&request.iot_device_controllers)
            .await
            .context("failed to persist controller inventory")?;
        let monitored = self.engine.monitored_point_count().await.unwrap_or(0);
        self.update_bacnet_status(reachable as i64, monitored as i64)
            .await;

        Ok(())
    }

    async fn handle_start_monitoring(&self, command: MonitoringControl, sender: ActorName) {
        info!(
            "Starting monitoring, command id {:?}",
            command.command_id
        );
        self.monitoring_enabled.store(true, Ordering::SeqCst);
        self.update_monitoring_status(MonitoringStatus::Active).await;
        self.trigger_force_heartbeat("monitoring_started").await;

        let response = Payload::StartMonitoringResponse(MonitoringControlResponse {
            success: true,
            message: "Monitoring started successfully".to_string(),
            command_id: command.command_id,
        });
        if let Err(e) = self
            .registry
            .send_from(ActorName::Bacnet, sender, response)
            .await
        {
            error!("Could not send start-monitoring response: {e}");
        }
    }

    async fn handle_stop_monitoring(&self, command: MonitoringControl, sender: ActorName) {
        info!(
            "Stopping monitoring, command id {:?}",
            command.command_id
        );
        self.monitoring_enabled.store(false, Ordering::SeqCst);
        self.update_monitoring_status(MonitoringStatus::Stopped)
            .await;
        self.trigger_force_heartbeat("monitoring_stopped").await;

        let response = Payload::StopMonitoringResponse(MonitoringControlResponse {
            success: true,
            message: "Monitoring stopped successfully".to_string(),
            command_id: command.command_id,
        });
        if let Err(e) = self
            .registry
            .send_from(ActorName::Bacnet, sender, response)
            .await
        {
            error!("Could not send stop-monitoring response: {e}");
        }
    }

    async fn persist_reader_states(&self, configs: &[ReaderConfig], connected: &[String]) {
        for config in configs {
            let status = if connected.contains(&config.id) {
                ConnectionStatus::Connected
            } else if config.is_active {
                ConnectionStatus::Error
            } else {
                ConnectionStatus::Disconnected
            };
            if let Err(e) = self.store.update_reader_connection(&config.id, status).await {
                warn!("Failed to persist connection state of reader {}: {e}", config.id);
            }
        }
    }

    async fn update_monitoring_status(&self, status: MonitoringStatus) {
        let update = DeviceStatusUpdate {
            organization_id: Some(self.identity.organization_id.clone()),
            site_id: Some(self.identity.site_id.clone()),
            monitoring_status: Some(status),
            ..DeviceStatusUpdate::default()
        };
        if let Err(e) = self
            .store
            .upsert_device_status(&self.identity.device_id, &update)
            .await
        {
            error!("Failed to update monitoring status: {e}");
        }
    }

    async fn update_bacnet_status(&self, devices_connected: i64, points_monitored: i64) {
        let update = DeviceStatusUpdate {
            organization_id: Some(self.identity.organization_id.clone()),
            site_id: Some(self.identity.site_id.clone()),
            bacnet_connection_status: Some(ConnectionStatus::Connected),
            bacnet_devices_connected: Some(devices_connected),
            bacnet_points_monitored: Some(points_monitored),
            ..DeviceStatusUpdate::default()
        };
        if let Err(e) = self
            .store
            .upsert_device_status(&self.identity.device_id, &update)
            .await
        {
            error!("Failed to update BACnet status: {e}");
            self.update_bacnet_connection(ConnectionStatus::Error).await;
        }
    }

    async fn update_bacnet_connection(&self, status: ConnectionStatus) {
        let update = DeviceStatusUpdate {
            organization_id: Some(self.identity.organization_id.clone()),
            site_id: Some(self.identity.site_id.clone()),
            bacnet_connection_status: Some(status),
            ..DeviceStatusUpdate::default()
        };
        if let Err(e) = self
            .store
            .upsert_device_status(&self.identity.device_id, &update)
            .await
        {
            error!("Failed to update BACnet connection status: {e}");
        }
    }

    async fn trigger_force_heartbeat(&self, reason: &str) {
        let trigger = Payload::ForceHeartbeatRequest(Trigger {
            reason: reason.to_string(),
        });
        if let Err(e) = self
            .registry
            .send_from(ActorName::Bacnet, ActorName::Heartbeat, trigger)
            .await
        {
            error!("Failed to trigger force heartbeat: {e}");
        }
    }
}
