//! Applies point-write commands: resolves the target in the cached
//! inventory, routes the write through the reader closest to the controller
//! and stages the written value so it joins the normal upload stream.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::{error, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::bacnet::poll::DEFAULT_CONTROLLER_PORT;
use crate::bacnet::reader::Reader;
use crate::bacnet::{ObjectRef, ObjectType, Property, RawValue, ReaderPool};
use crate::persistence::inventory::{ControllerSpec, ObjectSpec};
use crate::persistence::{ControllerPoint, Store};

use super::messages::{ActorName, Message, Payload, SetValueRequest, SetValueResponse, Trigger};
use super::registry::MailboxRegistry;

/// BACnet priority 8 is the manual-operator slot; life-safety writes would
/// use priority 1.
const WRITE_PRIORITY: u8 = 8;

pub struct WriterActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    pool: Arc<ReaderPool>,
    cancel: CancellationToken,
}

impl WriterActor {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        store: Store,
        pool: Arc<ReaderPool>,
        cancel: CancellationToken,
    ) -> Self {
        WriterActor {
            registry,
            store,
            pool,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!("BACnet writer actor started");
        let mailbox = self.registry.mailbox(ActorName::BacnetWriter)?;
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

    async fn handle_message(&self, message: Message) {
        match message.payload {
            Payload::SetValueToPointRequest(request) => {
                self.handle_set_value(request, message.sender).await;
            }
            other => {
                warn!("[WriterActor] Unhandled message type: {}", other.kind());
            }
        }
    }

    async fn handle_set_value(&self, request: SetValueRequest, sender: ActorName) {
        info!(
            "Handling set value request for point {}",
            request.iot_device_point_id
        );

        let command_id = request.command_id.clone();
        let point_label = request.iot_device_point_id.clone();

        let (response, wrote) = match self.write_value_to_point(&request).await {
            Ok(written) => (
                SetValueResponse {
                    success: true,
                    message: format!(
                        "Successfully wrote value {written} to point {point_label}"
                    ),
                    command_id,
                },
                true,
            ),
            Err(e) => {
                error!("Failed to write value to point {point_label}: {e:?}");
                (
                    SetValueResponse {
                        success: false,
                        message: format!("Failed to write value to point {point_label}: {e}"),
                        command_id,
                    },
                    false,
                )
            }
        };

        if let Err(e) = self
            .registry
            .send_from(
                ActorName::BacnetWriter,
                sender,
                Payload::SetValueToPointResponse(response),
            )
            .await
        {
            error!("Could not send set-value response: {e}");
            return;
        }

        if wrote {
            let trigger = Payload::ImmediateUploadTrigger(Trigger {
                reason: "manual_write".to_string(),
            });
            if let Err(e) = self
                .registry
                .send_from(ActorName::BacnetWriter, ActorName::Uploader, trigger)
                .await
            {
                error!("Could not trigger immediate upload: {e}");
            }
        }
    }

    /// The full write path: resolve the point, pick a reader, write at the
    /// manual priority, verify by reading back, and stage the written value.
    async fn write_value_to_point(&self, request: &SetValueRequest) -> anyhow::Result<RawValue> {
        let (controller, object) = self.find_target_point(request).await?;

        let reader = self.reader_for_controller(&controller.controller_ip_address)?;
        info!(
            "Using reader {} for controller {}",
            reader.id(),
            controller.controller_ip_address
        );

        let target: SocketAddr = format!(
            "{}:{}",
            controller.controller_ip_address, DEFAULT_CONTROLLER_PORT
        )
        .parse()
        .with_context(|| {
            format!(
                "controller {} has an unusable address",
                controller.controller_id
            )
        })?;

        let object_ref = ObjectRef {
            object_type: object.object_type,
            instance: object.point_id as u32,
        };
        let value = coerce_value(object.object_type, &request.present_value)?;

        reader
            .write_property(
                target,
                object_ref,
                Property::PresentValue,
                &value,
                Some(WRITE_PRIORITY),
            )
            .await
            .context("write request failed")?;

        let readback = reader
            .read_property(target, object_ref, Property::PresentValue)
            .await
            .context("verification read failed")?;

        if !values_match(&value, &readback) {
            bail!(
                "verification failed: wrote {value} but controller reports {readback}"
            );
        }
        info!("Wrote and verified value {readback} on {object_ref}");

        self.stage_written_value(request, controller, object, &readback)
            .await?;
        Ok(readback)
    }

    async fn find_target_point(
        &self,
        request: &SetValueRequest,
    ) -> anyhow::Result<(ControllerSpec, ObjectSpec)> {
        let controllers = self
            .store
            .load_inventory()
            .await?
            .ok_or_else(|| anyhow!("no controllers found in configuration"))?;

        let controller = controllers
            .into_iter()
            .find(|controller| controller.controller_id == request.controller_id)
            .ok_or_else(|| {
                anyhow!(
                    "controller {} not found in configuration",
                    request.controller_id
                )
            })?;

        let object = controller
            .object_list
            .iter()
            .find(|object| object.point_id.to_string() == request.point_instance_id)
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "point {} not found in controller {}",
                    request.point_instance_id,
                    request.controller_id
                )
            })?;

        Ok((controller, object))
    }

    /// The reader whose network covers the controller; falls back through
    /// the pool's default to the first reader.
    fn reader_for_controller(&self, controller_ip: &str) -> anyhow::Result<Arc<Reader>> {
        let selected = match controller_ip.parse::<Ipv4Addr>() {
            Ok(ip) => self.pool.select_by_subnet(ip),
            Err(_) => {
                warn!("Invalid controller IP address: {controller_ip}");
                self.pool
                    .default_reader()
                    .or_else(|| self.pool.snapshot().first().cloned())
            }
        };
        selected.ok_or_else(|| anyhow!("no BACnet reader available to reach {controller_ip}"))
    }

    async fn stage_written_value(
        &self,
        request: &SetValueRequest,
        controller: ControllerSpec,
        object: ObjectSpec,
        written: &RawValue,
    ) -> anyhow::Result<()> {
        let mut row = ControllerPoint::new(
            controller.controller_ip_address.clone(),
            i64::from(DEFAULT_CONTROLLER_PORT),
            object.object_type,
            object.point_id,
            object.iot_device_point_id.clone(),
            controller.controller_id.clone(),
            controller.device_id.to_string(),
        );
        row.present_value = Some(written.to_string());
        row.units = object
            .properties
            .get("units")
            .and_then(|units| units.as_str())
            .map(String::from);

        let row = self.store.insert_point(row).await?;
        info!(
            "Staged manual write for point {} as row {:?}",
            request.iot_device_point_id, row.id
        );
        Ok(())
    }
}

/// Maps the JSON command value onto the wire type the object expects.
fn coerce_value(object_type: ObjectType, value: &serde_json::Value) -> anyhow::Result<RawValue> {
    use serde_json::Value;

    let coerced = match (object_type, value) {
        (t, Value::Bool(b)) if !t.is_analog() => RawValue::Enumerated(u32::from(*b)),
        (t, Value::Number(n)) if t.is_analog() => RawValue::Real(
            n.as_f64()
                .ok_or_else(|| anyhow!("unrepresentable numeric value {n}"))?,
        ),
        (_, Value::Number(n)) => {
            let numeric = n
                .as_u64()
                .ok_or_else(|| anyhow!("value {n} is not a valid state number"))?;
            RawValue::Enumerated(u32::try_from(numeric)?)
        }
        (_, Value::String(text)) => RawValue::Text(text.clone()),
        (_, Value::Null) => RawValue::Null,
        (_, other) => bail!("unsupported value shape: {other}"),
    };
    Ok(coerced)
}

/// Read-back comparison in the value's textual rendering, with a small
/// tolerance for real values that survive a float32 round trip.
fn values_match(written: &RawValue, readback: &RawValue) -> bool {
    if let (Some(a), Some(b)) = (written.as_f64(), readback.as_f64()) {
        return (a - b).abs() < 1e-3;
    }
    written.to_string() == readback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_follows_object_type() {
        let analog = coerce_value(ObjectType::AnalogValue, &serde_json::json!(21.5)).unwrap();
        assert_eq!(analog, RawValue::Real(21.5));

        let binary = coerce_value(ObjectType::BinaryOutput, &serde_json::json!(true)).unwrap();
        assert_eq!(binary, RawValue::Enumerated(1));

        let multistate = coerce_value(ObjectType::MultiStateValue, &serde_json::json!(3)).unwrap();
        assert_eq!(multistate, RawValue::Enumerated(3));
    }

    #[test]
    fn readback_comparison_tolerates_float_rounding() {
        assert!(values_match(&RawValue::Real(21.5), &RawValue::Real(21.5)));
        assert!(values_match(
            &RawValue::Real(0.1),
            &RawValue::Real(f64::from(0.1_f32))
        ));
        assert!(!values_match(&RawValue::Real(1.0), &RawValue::Real(2.0)));
        assert!(values_match(
            &RawValue::Text("active".into()),
            &RawValue::Text("active".into())
        ));
    }
}
