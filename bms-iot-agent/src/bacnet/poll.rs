//! The poll engine walks the cached controller inventory, reads each point
//! through the reader pool and stages the samples for upload.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;

use crate::persistence::inventory::{ControllerSpec, ObjectSpec};
use crate::persistence::{ControllerPoint, Store};

use super::health;
use super::pool::ReaderPool;
use super::reader::Reader;
use super::{ObjectRef, ObjectType, Property, RawValue};

const DISCOVERY_WAIT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONTROLLER_PORT: u16 = 47808;

const EVENT_PROPERTIES: [Property; 11] = [
    Property::TimeDelay,
    Property::TimeDelayNormal,
    Property::NotifyType,
    Property::EventEnable,
    Property::AckedTransitions,
    Property::EventTimeStamps,
    Property::EventMessageTexts,
    Property::EventMessageTextsConfig,
    Property::EventDetectionEnable,
    Property::EventAlgorithmInhibitRef,
    Property::EventAlgorithmInhibit,
];

#[derive(Debug, Default, Clone)]
pub struct PollSummary {
    pub controllers: usize,
    pub points_sampled: usize,
    pub read_failures: usize,
}

pub struct PollEngine {
    store: Store,
    pool: Arc<ReaderPool>,
}

impl PollEngine {
    pub fn new(store: Store, pool: Arc<ReaderPool>) -> Self {
        PollEngine { store, pool }
    }

    pub fn pool(&self) -> &Arc<ReaderPool> {
        &self.pool
    }

    /// One full sweep over the cached inventory. Staging rows are inserted
    /// per controller so a dead controller cannot hold up the others' data.
    pub async fn poll_all_devices(&self) -> crate::persistence::Result<PollSummary> {
        let mut summary = PollSummary::default();

        let Some(controllers) = self.store.load_inventory().await? else {
            debug!("No controller inventory cached yet, nothing to poll");
            return Ok(summary);
        };

        for controller in &controllers {
            summary.controllers += 1;

            let Some(target) = controller_address(controller) else {
                warn!(
                    "Controller {} has unusable address '{}', skipping",
                    controller.controller_id, controller.controller_ip_address
                );
                summary.read_failures += controller.object_list.len();
                continue;
            };

            let mut rows = Vec::with_capacity(controller.object_list.len());
            for object in &controller.object_list {
                let Some(reader) = self.pool.select_for_operation() else {
                    warn!("Reader pool exhausted, aborting poll sweep");
                    summary.read_failures += 1;
                    continue;
                };

                match self.sample_point(&reader, target, controller, object).await {
                    Some(row) => {
                        if row.error_info.is_some() {
                            summary.read_failures += 1;
                        } else {
                            summary.points_sampled += 1;
                        }
                        rows.push(row);
                    }
                    None => summary.read_failures += 1,
                }
            }

            self.store.bulk_insert_points(rows).await?;
        }

        info!(
            "Poll sweep finished: {} controllers, {} points sampled, {} read failures",
            summary.controllers, summary.points_sampled, summary.read_failures
        );
        Ok(summary)
    }

    /// Reads one point's present value plus its health and optional
    /// properties, producing a storage-ready staging row.
    async fn sample_point(
        &self,
        reader: &Arc<Reader>,
        target: SocketAddr,
        controller: &ControllerSpec,
        object: &ObjectSpec,
    ) -> Option<ControllerPoint> {
        let object_ref = ObjectRef {
            object_type: object.object_type,
            instance: object.point_id as u32,
        };

        let mut row = ControllerPoint::new(
            controller.controller_ip_address.clone(),
            i64::from(DEFAULT_CONTROLLER_PORT),
            object.object_type,
            object.point_id,
            object.iot_device_point_id.clone(),
            controller.controller_id.clone(),
            controller.device_id.to_string(),
        );

        match reader
            .read_property(target, object_ref, Property::PresentValue)
            .await
        {
            Ok(value) => row.present_value = Some(value.to_string()),
            Err(e) => {
                warn!(
                    "Failed to read {object_ref} on controller {}: {e}",
                    controller.controller_id
                );
                row.error_info = Some(json!({ "error": e.to_string() }).to_string());
                return Some(row);
            }
        }

        let mut raw = HashMap::new();
        for property in point_properties(object.object_type) {
            match reader.read_property(target, object_ref, property).await {
                Ok(value) => {
                    raw.insert(property, value);
                }
                Err(e) => {
                    // Optional properties are allowed to be absent; the
                    // health processor turns the gap into a null field.
                    debug!("Property {property:?} unavailable on {object_ref}: {e}");
                }
            }
        }

        apply_properties(&mut row, &raw, object);
        Some(row)
    }

    /// Persists a cloud-provided inventory snapshot and probes the network
    /// for reachable controllers. Returns the number of devices that
    /// answered the sweep.
    pub async fn refresh_inventory(
        &self,
        controllers: &[ControllerSpec],
    ) -> crate::persistence::Result<usize> {
        self.store.save_inventory(controllers).await?;
        info!("Saved inventory snapshot with {} controllers", controllers.len());

        let reachable = match self.pool.default_reader() {
            Some(reader) => match reader.discover(DISCOVERY_WAIT).await {
                Ok(devices) => {
                    info!("Discovery found {} devices on the network", devices.len());
                    devices.len()
                }
                Err(e) => {
                    warn!("Network discovery failed: {e}");
                    0
                }
            },
            None => 0,
        };

        Ok(reachable)
    }

    /// Number of points in the cached inventory, for status reporting.
    pub async fn monitored_point_count(&self) -> crate::persistence::Result<usize> {
        let inventory = self.store.load_inventory().await?;
        Ok(inventory
            .map(|controllers| controllers.iter().map(|c| c.object_list.len()).sum())
            .unwrap_or(0))
    }
}

fn controller_address(controller: &ControllerSpec) -> Option<SocketAddr> {
    format!(
        "{}:{}",
        controller.controller_ip_address, DEFAULT_CONTROLLER_PORT
    )
    .parse()
    .ok()
}

/// Health plus the optional properties appropriate for the object type.
fn point_properties(object_type: ObjectType) -> Vec<Property> {
    let mut properties = vec![
        Property::Units,
        Property::StatusFlags,
        Property::EventState,
        Property::OutOfService,
        Property::Reliability,
        Property::NotificationClass,
        Property::ReliabilityEvaluationInhibit,
    ];
    properties.extend(EVENT_PROPERTIES);

    if object_type.is_analog() {
        properties.extend([
            Property::MinPresValue,
            Property::MaxPresValue,
            Property::HighLimit,
            Property::LowLimit,
            Property::Resolution,
            Property::CovIncrement,
            Property::Deadband,
            Property::LimitEnable,
        ]);
    }

    if object_type.is_commandable() {
        properties.extend([Property::PriorityArray, Property::RelinquishDefault]);
    }

    properties
}

fn apply_properties(row: &mut ControllerPoint, raw: &HashMap<Property, RawValue>, object: &ObjectSpec) {
    let get = |property: Property| raw.get(&property);

    row.units = health::scalar_string(get(Property::Units))
        .or_else(|| object.properties.get("units").and_then(|u| u.as_str()).map(String::from));

    row.status_flags = health::status_flags(get(Property::StatusFlags));
    row.event_state = health::event_state(get(Property::EventState));
    row.out_of_service = health::out_of_service(get(Property::OutOfService));
    row.reliability = health::reliability(get(Property::Reliability));

    row.min_pres_value = health::scalar_f64(get(Property::MinPresValue));
    row.max_pres_value = health::scalar_f64(get(Property::MaxPresValue));
    row.high_limit = health::scalar_f64(get(Property::HighLimit));
    row.low_limit = health::scalar_f64(get(Property::LowLimit));
    row.resolution = health::scalar_f64(get(Property::Resolution));
    row.priority_array = health::priority_array(get(Property::PriorityArray));
    row.relinquish_default = health::scalar_f64(get(Property::RelinquishDefault));
    row.cov_increment = health::scalar_f64(get(Property::CovIncrement));
    row.time_delay = health::scalar_i64(get(Property::TimeDelay));
    row.time_delay_normal = health::scalar_i64(get(Property::TimeDelayNormal));
    row.notification_class = health::scalar_i64(get(Property::NotificationClass));
    row.notify_type = health::scalar_string(get(Property::NotifyType));
    row.deadband = health::scalar_f64(get(Property::Deadband));
    row.limit_enable = health::limit_enable(get(Property::LimitEnable));
    row.event_enable = health::event_transition_bits(get(Property::EventEnable), "eventEnable");
    row.acked_transitions =
        health::event_transition_bits(get(Property::AckedTransitions), "ackedTransitions");
    row.event_time_stamps = health::event_timestamps(get(Property::EventTimeStamps));
    row.event_message_texts =
        health::event_message_texts(get(Property::EventMessageTexts), "eventMessageTexts");
    row.event_message_texts_config = health::event_message_texts(
        get(Property::EventMessageTextsConfig),
        "eventMessageTextsConfig",
    );
    row.event_detection_enable = health::scalar_bool(get(Property::EventDetectionEnable));
    row.event_algorithm_inhibit_ref =
        health::object_property_reference(get(Property::EventAlgorithmInhibitRef));
    row.event_algorithm_inhibit = health::scalar_bool(get(Property::EventAlgorithmInhibit));
    row.reliability_evaluation_inhibit =
        health::scalar_bool(get(Property::ReliabilityEvaluationInhibit));
}
