//! Broker session actor: subscribes to the command topics, dispatches
//! inbound commands into the actor system, and publishes data, responses and
//! heartbeats at QoS 1. Staged points are only reported back to the uploader
//! after the broker acknowledges the publish.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use log::{debug, error, info, trace, warn};
use rumqttc::{AsyncClient, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use serde_json::json;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::actors::messages::{
    ActorName, ConfigUploadRequest, DeviceReboot, Message, MonitoringControl, Payload, PointBatch,
    SetValueRequest,
};
use crate::actors::registry::MailboxRegistry;
use crate::persistence::{ConnectionStatus, ControllerPoint, DeploymentConfig, DeviceStatusUpdate, Store};

pub mod config;
pub mod topics;

pub use config::MqttSettings;

const CLIENT_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_MIN_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Correlates `Outgoing::Publish` packet ids with the point batches they
/// carry, so a PubAck can be turned into a publish response. Publishes and
/// their outgoing events are observed in the same order, so a queue pairs
/// them up.
#[derive(Default)]
struct PendingPublishes {
    unassigned: VecDeque<Option<PointBatch>>,
    in_flight: HashMap<u16, PointBatch>,
}

impl PendingPublishes {
    fn enqueue_data(&mut self, batch: PointBatch) {
        self.unassigned.push_back(Some(batch));
    }

    fn enqueue_other(&mut self) {
        self.unassigned.push_back(None);
    }

    fn assign(&mut self, pkid: u16) {
        if let Some(Some(batch)) = self.unassigned.pop_front() {
            self.in_flight.insert(pkid, batch);
        }
    }

    fn take(&mut self, pkid: u16) -> Option<PointBatch> {
        self.in_flight.remove(&pkid)
    }
}

pub struct MqttActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    settings: MqttSettings,
    identity: DeploymentConfig,
    ca_cert_path: PathBuf,
    cancel: CancellationToken,
}

impl MqttActor {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        store: Store,
        settings: MqttSettings,
        identity: DeploymentConfig,
        ca_cert_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        MqttActor {
            registry,
            store,
            settings,
            identity,
            ca_cert_path,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let prefix = topics::topic_prefix(
            &self.identity.organization_id,
            &self.identity.site_id,
            &self.identity.device_id,
        );
        let client_id = self
            .settings
            .client_id
            .clone()
            .unwrap_or_else(|| self.identity.device_id.clone());

        let options = config::mqtt_options(&self.settings, &client_id, &self.ca_cert_path)?;
        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);
        info!(
            "MQTT actor connecting to {}:{} as {client_id}",
            self.settings.host, self.settings.port
        );

        let mailbox = self.registry.mailbox(ActorName::Mqtt)?;
        let mut rx = mailbox.lock().await;

        let mut pending = PendingPublishes::default();
        let mut backoff = RECONNECT_MIN_BACKOFF;
        let mut last_status: Option<ConnectionStatus> = None;
        self.transition(&mut last_status, ConnectionStatus::Connecting)
            .await;

        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    let _ = client.disconnect().await;
                    self.transition(&mut last_status, ConnectionStatus::Disconnected).await;
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        self.transition(&mut last_status, ConnectionStatus::Connected).await;
                        backoff = RECONNECT_MIN_BACKOFF;

                        let filter = topics::command_request_filter(&prefix);
                        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to command topics: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.dispatch_command(&publish.topic, &publish.payload, &client, &prefix, &mut pending)
                            .await;
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        if let Some(batch) = pending.take(ack.pkid) {
                            trace!("Broker acknowledged data publish {}", ack.pkid);
                            if let Err(e) = self
                                .registry
                                .send_from(
                                    ActorName::Mqtt,
                                    ActorName::Uploader,
                                    Payload::PointPublishResponse(batch),
                                )
                                .await
                            {
                                error!("Could not forward publish acknowledgement: {e}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack
                            .return_codes
                            .iter()
                            .any(|code| *code == SubscribeReasonCode::Failure)
                        {
                            warn!("Broker refused some command subscriptions");
                        } else {
                            debug!("Command subscriptions acknowledged");
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        pending.assign(pkid);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}");
                        self.transition(&mut last_status, ConnectionStatus::Error).await;
                        select! {
                            _ = self.cancel.cancelled() => {
                                return Ok(());
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
                        self.transition(&mut last_status, ConnectionStatus::Connecting).await;
                    }
                },
                message = rx.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    self.handle_outbound(message, &client, &prefix, &mut pending).await;
                }
            }
        }
    }

    /// Publishes an actor-system message on its broker topic. Data batches
    /// are remembered until the matching PubAck arrives.
    async fn handle_outbound(
        &self,
        message: Message,
        client: &AsyncClient,
        prefix: &str,
        pending: &mut PendingPublishes,
    ) {
        match message.payload {
            Payload::PointPublishRequest(batch) => {
                let wire = batch_to_wire(&batch.points);
                let topic = topics::data_bulk_topic(prefix);
                match serde_json::to_vec(&wire) {
                    Ok(body) => {
                        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, body).await {
                            warn!("Failed to queue data publish: {e}");
                        } else {
                            pending.enqueue_data(batch);
                        }
                    }
                    Err(e) => error!("Could not serialize point batch: {e}"),
                }
            }
            Payload::HeartbeatStatus(heartbeat) => {
                self.publish_json(
                    client,
                    pending,
                    topics::heartbeat_topic(prefix),
                    &heartbeat,
                )
                .await;
            }
            Payload::StartMonitoringResponse(response) => {
                self.publish_json(
                    client,
                    pending,
                    topics::command_response_topic(prefix, "start_monitoring"),
                    &response,
                )
                .await;
            }
            Payload::StopMonitoringResponse(response) => {
                self.publish_json(
                    client,
                    pending,
                    topics::command_response_topic(prefix, "stop_monitoring"),
                    &response,
                )
                .await;
            }
            Payload::SetValueToPointResponse(response) => {
                self.publish_json(
                    client,
                    pending,
                    topics::command_response_topic(prefix, "set_value_to_point"),
                    &response,
                )
                .await;
            }
            Payload::ConfigUploadResponse(response) => {
                self.publish_json(
                    client,
                    pending,
                    topics::command_response_topic(prefix, "config_upload"),
                    &response,
                )
                .await;
            }
            other => {
                warn!("[MqttActor] Unhandled message type: {}", other.kind());
            }
        }
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        client: &AsyncClient,
        pending: &mut PendingPublishes,
        topic: String,
        payload: &T,
    ) {
        match serde_json::to_vec(payload) {
            Ok(body) => {
                if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, body).await {
                    warn!("Failed to queue publish: {e}");
                } else {
                    pending.enqueue_other();
                }
            }
            Err(e) => error!("Could not serialize outbound payload: {e}"),
        }
    }

    /// Routes an inbound command to its actor by the command leaf of the
    /// topic. Malformed payloads are dropped, except for RPC-style commands
    /// carrying a command id, which get an error response.
    async fn dispatch_command(
        &self,
        topic: &str,
        body: &[u8],
        client: &AsyncClient,
        prefix: &str,
        pending: &mut PendingPublishes,
    ) {
        let Some(command) = topics::command_name(topic) else {
            warn!("Ignoring message on unexpected topic {topic:?}");
            return;
        };
        debug!("Inbound command {command}");

        let routed = match command {
            "config_upload" => serde_json::from_slice::<ConfigUploadRequest>(body)
                .map(|request| (ActorName::Bacnet, Payload::ConfigUploadRequest(request))),
            "start_monitoring" => serde_json::from_slice::<MonitoringControl>(body)
                .map(|request| (ActorName::Bacnet, Payload::StartMonitoringRequest(request))),
            "stop_monitoring" => serde_json::from_slice::<MonitoringControl>(body)
                .map(|request| (ActorName::Bacnet, Payload::StopMonitoringRequest(request))),
            "set_value_to_point" => serde_json::from_slice::<SetValueRequest>(body)
                .map(|request| (ActorName::BacnetWriter, Payload::SetValueToPointRequest(request))),
            "reboot" => serde_json::from_slice::<DeviceReboot>(body)
                .map(|request| (ActorName::Supervisor, Payload::DeviceReboot(request))),
            unknown => {
                warn!("Unknown command {unknown:?}, ignoring");
                return;
            }
        };

        match routed {
            Ok((receiver, payload)) => {
                if let Err(e) = self.registry.send_from(ActorName::Mqtt, receiver, payload).await {
                    error!("Could not route {command} command: {e}");
                }
            }
            Err(e) => {
                warn!("Malformed {command} payload: {e}");
                // RPC commands still owe the caller an answer.
                if let Some(command_id) = extract_command_id(body) {
                    let response = json!({
                        "success": false,
                        "message": format!("invalid {command} payload: {e}"),
                        "commandId": command_id,
                    });
                    self.publish_json(
                        client,
                        pending,
                        topics::command_response_topic(prefix, command),
                        &response,
                    )
                    .await;
                }
            }
        }
    }

    /// Persists the connection status, but only on actual transitions.
    async fn transition(&self, last: &mut Option<ConnectionStatus>, status: ConnectionStatus) {
        if *last == Some(status) {
            return;
        }
        *last = Some(status);

        let update = DeviceStatusUpdate {
            organization_id: Some(self.identity.organization_id.clone()),
            site_id: Some(self.identity.site_id.clone()),
            mqtt_connection_status: Some(status),
            ..DeviceStatusUpdate::default()
        };
        if let Err(e) = self
            .store
            .upsert_device_status(&self.identity.device_id, &update)
            .await
        {
            error!("Failed to record MQTT connection status: {e}");
        }
    }
}

fn extract_command_id(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("commandId")
        .and_then(|id| id.as_str())
        .map(String::from)
}

/// Wire form of a staged sample. JSON-encoded columns are expanded into
/// structured fields at this boundary only.
fn point_to_wire(point: &ControllerPoint) -> serde_json::Value {
    let parse_json = |raw: &Option<String>| -> serde_json::Value {
        raw.as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null)
    };

    json!({
        "id": point.id,
        "controllerIpAddress": point.controller_ip_address,
        "controllerPort": point.controller_port,
        "objectType": point.bacnet_object_type,
        "pointId": point.point_id,
        "iotDevicePointId": point.iot_device_point_id,
        "controllerId": point.controller_id,
        "controllerDeviceId": point.controller_device_id,
        "units": point.units,
        "presentValue": point.present_value,
        "statusFlags": point.status_flags,
        "eventState": point.event_state,
        "outOfService": point.out_of_service,
        "reliability": point.reliability,
        "minPresValue": point.min_pres_value,
        "maxPresValue": point.max_pres_value,
        "highLimit": point.high_limit,
        "lowLimit": point.low_limit,
        "resolution": point.resolution,
        "priorityArray": parse_json(&point.priority_array),
        "relinquishDefault": point.relinquish_default,
        "covIncrement": point.cov_increment,
        "timeDelay": point.time_delay,
        "timeDelayNormal": point.time_delay_normal,
        "notificationClass": point.notification_class,
        "notifyType": point.notify_type,
        "deadband": point.deadband,
        "limitEnable": parse_json(&point.limit_enable),
        "eventEnable": parse_json(&point.event_enable),
        "ackedTransitions": parse_json(&point.acked_transitions),
        "eventTimeStamps": parse_json(&point.event_time_stamps),
        "eventMessageTexts": parse_json(&point.event_message_texts),
        "eventMessageTextsConfig": parse_json(&point.event_message_texts_config),
        "eventDetectionEnable": point.event_detection_enable,
        "eventAlgorithmInhibitRef": parse_json(&point.event_algorithm_inhibit_ref),
        "eventAlgorithmInhibit": point.event_algorithm_inhibit,
        "reliabilityEvaluationInhibit": point.reliability_evaluation_inhibit,
        "errorInfo": parse_json(&point.error_info),
        "createdAt": point.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "createdAtUnixMilliTimestamp": point.created_at_millis,
    })
}

fn batch_to_wire(points: &[ControllerPoint]) -> serde_json::Value {
    json!({ "points": points.iter().map(point_to_wire).collect::<Vec<_>>() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::ObjectType;

    #[test]
    fn wire_form_expands_json_columns() {
        let mut point = ControllerPoint::new(
            "10.0.1.50",
            47808,
            ObjectType::AnalogInput,
            3,
            "pt-uuid",
            "ctl-1",
            "1201",
        );
        point.present_value = Some("21.5".to_string());
        point.priority_array = Some("[null,null,22.5]".to_string());
        point.status_flags = Some("fault".to_string());

        let wire = point_to_wire(&point);
        assert_eq!(wire["presentValue"], "21.5");
        assert_eq!(wire["objectType"], "analogInput");
        assert_eq!(wire["priorityArray"][2], 22.5);
        assert_eq!(wire["statusFlags"], "fault");
    }

    #[test]
    fn pending_publishes_pair_in_publish_order() {
        let mut pending = PendingPublishes::default();
        let batch = PointBatch { points: Vec::new() };

        pending.enqueue_other(); // heartbeat
        pending.enqueue_data(batch); // data bulk

        pending.assign(11);
        pending.assign(12);

        assert!(pending.take(11).is_none());
        assert!(pending.take(12).is_some());
        assert!(pending.take(12).is_none());
    }
}
