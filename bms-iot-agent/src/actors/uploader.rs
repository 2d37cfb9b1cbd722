//! Drains unacked staging rows towards the broker and forwards controller
//! inventory uploads to the cloud HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::cloud;
use crate::persistence::Store;

use super::messages::{ActorName, ConfigUploadResponse, Message, Payload, PointBatch};
use super::registry::MailboxRegistry;

const DRAIN_INTERVAL: Duration = Duration::from_secs(2);

pub struct UploaderActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    cancel: CancellationToken,
}

impl UploaderActor {
    pub fn new(registry: Arc<MailboxRegistry>, store: Store, cancel: CancellationToken) -> Self {
        UploaderActor {
            registry,
            store,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!("UploaderActor started");
        let mailbox = self.registry.mailbox(ActorName::Uploader)?;
        let mut rx = mailbox.lock().await;

        let mut tick = tokio::time::interval(DRAIN_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    if let Err(e) = self.publish_points().await {
                        error!("Uploader drain cycle failed: {e}");
                    }
                }
                message = rx.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    self.handle_message(message).await;
                }
            }
        }
    }

    /// One drain cycle: hand the oldest unacked rows to the MQTT actor. The
    /// rows are only marked uploaded once the broker acknowledges them.
    async fn publish_points(&self) -> anyhow::Result<()> {
        let points = self.store.points_to_upload().await?;
        if points.is_empty() {
            debug!("No points found to publish");
            return Ok(());
        }

        info!("Publishing {} staged points", points.len());
        self.registry
            .send_from(
                ActorName::Uploader,
                ActorName::Mqtt,
                Payload::PointPublishRequest(PointBatch { points }),
            )
            .await?;
        Ok(())
    }

    async fn handle_message(&self, message: Message) {
        match message.payload {
            Payload::PointPublishResponse(batch) => {
                if let Err(e) = self.on_publish_response(batch).await {
                    error!("Failed to mark points as uploaded: {e}");
                }
            }
            Payload::ConfigUploadResponse(response) => {
                self.on_config_upload_response(response).await;
            }
            Payload::ImmediateUploadTrigger(trigger) => {
                info!("Immediate upload triggered: {}", trigger.reason);
                // Fire-and-forget; the periodic cycle retries naturally.
                if let Err(e) = self.publish_points().await {
                    error!("Immediate upload cycle failed: {e}");
                }
            }
            other => {
                warn!("[UploaderActor] Unhandled message type: {}", other.kind());
            }
        }
    }

    async fn on_publish_response(&self, batch: PointBatch) -> anyhow::Result<()> {
        let ids: Vec<i64> = batch.points.iter().filter_map(|point| point.id).collect();
        info!("Broker acknowledged {} points", ids.len());
        self.store.mark_points_uploaded(&ids).await?;
        Ok(())
    }

    /// Pushes the cached inventory to the cloud URL from the request, then
    /// reports the final outcome back to the broker.
    async fn on_config_upload_response(&self, response: ConfigUploadResponse) {
        let success = match (&response.request, response.success) {
            (Some(request), true) => {
                let inventory = match self.store.load_inventory().await {
                    Ok(Some(inventory)) => inventory,
                    Ok(None) => {
                        warn!("No BACnet config found to upload");
                        Vec::new()
                    }
                    Err(e) => {
                        error!("Could not load inventory for upload: {e}");
                        Vec::new()
                    }
                };

                cloud::upload_config(
                    &request.url_to_upload_config,
                    &request.jwt_token,
                    inventory,
                )
                .await
            }
            (_, reconfigured) => {
                // Reconfiguration already failed upstream; nothing to POST.
                reconfigured
            }
        };

        let final_response = Payload::ConfigUploadResponse(ConfigUploadResponse {
            success,
            request: None,
        });
        if let Err(e) = self
            .registry
            .send_from(ActorName::Uploader, ActorName::Mqtt, final_response)
            .await
        {
            error!("Could not send config upload response to MQTT: {e}");
        }
    }
}
