//! The typed message catalog exchanged between actors, and the envelope that
//! carries it through the mailbox registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::persistence::inventory::ControllerSpec;
use crate::persistence::{ConnectionStatus, ControllerPoint, MonitoringStatus};
use crate::bacnet::ReaderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorName {
    Mqtt,
    Bacnet,
    BacnetWriter,
    Uploader,
    Cleaner,
    Heartbeat,
    SystemMetrics,
    Supervisor,
}

impl fmt::Display for ActorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorName::Mqtt => "mqtt",
            ActorName::Bacnet => "bacnet",
            ActorName::BacnetWriter => "bacnet-writer",
            ActorName::Uploader => "uploader",
            ActorName::Cleaner => "cleaner",
            ActorName::Heartbeat => "heartbeat",
            ActorName::SystemMetrics => "system-metrics",
            ActorName::Supervisor => "supervisor",
        };
        f.write_str(name)
    }
}

/// Cloud command to replace the reader set and controller inventory, then
/// push the resulting config back over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUploadRequest {
    pub url_to_upload_config: String,
    pub jwt_token: String,
    #[serde(default)]
    pub iot_device_controllers: Vec<ControllerSpec>,
    #[serde(default)]
    pub bacnet_readers: Vec<ReaderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUploadResponse {
    pub success: bool,
    /// Present on the leg from the monitoring actor to the uploader, absent
    /// on the final answer published to the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Box<ConfigUploadRequest>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringControl {
    #[serde(default)]
    pub command_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub command_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointBatch {
    pub points: Vec<ControllerPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValueRequest {
    pub controller_id: String,
    pub point_instance_id: String,
    pub iot_device_point_id: String,
    pub present_value: serde_json::Value,
    #[serde(default)]
    pub command_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValueResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub command_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReboot {
    pub device_id: String,
    #[serde(default)]
    pub command_id: Option<String>,
}

/// Heartbeat snapshot published to the broker. Field names are the wire
/// contract with the cloud side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub uptime_seconds: Option<i64>,
    pub load_average: Option<f64>,
    pub monitoring_status: Option<MonitoringStatus>,
    pub mqtt_connection_status: Option<ConnectionStatus>,
    pub bacnet_connection_status: Option<ConnectionStatus>,
    pub bacnet_devices_connected: Option<i64>,
    pub bacnet_points_monitored: Option<i64>,
}

/// Closed set of message payloads; each actor matches on the variants it
/// handles and logs the rest.
#[derive(Debug, Clone)]
pub enum Payload {
    ConfigUploadRequest(ConfigUploadRequest),
    ConfigUploadResponse(ConfigUploadResponse),
    StartMonitoringRequest(MonitoringControl),
    StopMonitoringRequest(MonitoringControl),
    StartMonitoringResponse(MonitoringControlResponse),
    StopMonitoringResponse(MonitoringControlResponse),
    PointPublishRequest(PointBatch),
    PointPublishResponse(PointBatch),
    SetValueToPointRequest(SetValueRequest),
    SetValueToPointResponse(SetValueResponse),
    ImmediateUploadTrigger(Trigger),
    ForceHeartbeatRequest(Trigger),
    HeartbeatStatus(HeartbeatStatus),
    DeviceReboot(DeviceReboot),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::ConfigUploadRequest(_) => "CONFIG_UPLOAD_REQUEST",
            Payload::ConfigUploadResponse(_) => "CONFIG_UPLOAD_RESPONSE",
            Payload::StartMonitoringRequest(_) => "START_MONITORING_REQUEST",
            Payload::StopMonitoringRequest(_) => "STOP_MONITORING_REQUEST",
            Payload::StartMonitoringResponse(_) => "START_MONITORING_RESPONSE",
            Payload::StopMonitoringResponse(_) => "STOP_MONITORING_RESPONSE",
            Payload::PointPublishRequest(_) => "POINT_PUBLISH_REQUEST",
            Payload::PointPublishResponse(_) => "POINT_PUBLISH_RESPONSE",
            Payload::SetValueToPointRequest(_) => "SET_VALUE_TO_POINT_REQUEST",
            Payload::SetValueToPointResponse(_) => "SET_VALUE_TO_POINT_RESPONSE",
            Payload::ImmediateUploadTrigger(_) => "IMMEDIATE_UPLOAD_TRIGGER",
            Payload::ForceHeartbeatRequest(_) => "FORCE_HEARTBEAT_REQUEST",
            Payload::HeartbeatStatus(_) => "HEARTBEAT_STATUS",
            Payload::DeviceReboot(_) => "DEVICE_REBOOT",
        }
    }
}

/// Envelope routed through the registry. `receiver` is rewritten per copy on
/// broadcast so handlers can switch on it uniformly.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: ActorName,
    pub receiver: ActorName,
    pub payload: Payload,
}
