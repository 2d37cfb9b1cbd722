#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bms_iot_agent::actors::messages::{ActorName, Message};
use bms_iot_agent::actors::MailboxRegistry;
use bms_iot_agent::bacnet::driver::{
    BacnetClient, ClientFactory, DiscoveredDevice, DriverError,
};
use bms_iot_agent::bacnet::{ObjectRef, ObjectType, Property, RawValue, ReaderConfig};
use bms_iot_agent::persistence::inventory::{ControllerSpec, ObjectSpec};
use bms_iot_agent::persistence::{ControllerPoint, Store};

pub async fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Store::open(&dir.path().join("agent.db"))
        .await
        .expect("open store");
    store.migrate().await.expect("migrate store");
    (store, dir)
}

pub fn sample_point(point_id: i64) -> ControllerPoint {
    let mut point = ControllerPoint::new(
        "10.0.1.50",
        47808,
        ObjectType::AnalogInput,
        point_id,
        format!("pt-{point_id}"),
        "ctl-1",
        "1201",
    );
    point.present_value = Some("21.5".to_string());
    point
}

pub fn reader_config(id: &str, ip: &str, subnet_mask: u8, port: u16) -> ReaderConfig {
    ReaderConfig {
        id: id.to_string(),
        ip_address: ip.to_string(),
        subnet_mask,
        bacnet_device_id: 1201,
        port,
        bbmd_enabled: false,
        bbmd_server_ip: None,
        is_active: true,
    }
}

pub fn controller_spec(
    controller_id: &str,
    ip: &str,
    objects: Vec<(ObjectType, i64, &str)>,
) -> ControllerSpec {
    ControllerSpec {
        vendor_id: 5,
        device_id: 1201,
        controller_ip_address: ip.to_string(),
        controller_id: controller_id.to_string(),
        object_list: objects
            .into_iter()
            .map(|(object_type, point_id, uuid)| ObjectSpec {
                object_type,
                point_id,
                iot_device_point_id: uuid.to_string(),
                properties: serde_json::json!({}),
            })
            .collect(),
    }
}

/// In-memory protocol stand-in. Reads answer from a value table, writes are
/// recorded and become visible to subsequent reads.
#[derive(Default)]
pub struct MockClient {
    values: Mutex<HashMap<(ObjectRef, Property), RawValue>>,
    pub writes: Mutex<Vec<(SocketAddr, ObjectRef, RawValue, Option<u8>)>>,
}

impl MockClient {
    pub fn set_value(&self, object: ObjectRef, property: Property, value: RawValue) {
        self.values
            .lock()
            .unwrap()
            .insert((object, property), value);
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl BacnetClient for MockClient {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
    ) -> Result<RawValue, DriverError> {
        self.values
            .lock()
            .unwrap()
            .get(&(object, property))
            .cloned()
            .ok_or(DriverError::Timeout(target))
    }

    async fn write_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
        value: &RawValue,
        priority: Option<u8>,
    ) -> Result<(), DriverError> {
        self.writes
            .lock()
            .unwrap()
            .push((target, object, value.clone(), priority));
        self.values
            .lock()
            .unwrap()
            .insert((object, property), value.clone());
        Ok(())
    }

    async fn discover(&self, _wait: Duration) -> Result<Vec<DiscoveredDevice>, DriverError> {
        Ok(Vec::new())
    }

    async fn shutdown(&self) {}
}

/// Hands out one [`MockClient`] per reader id, so tests can inspect traffic
/// per reader after the fact.
#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<HashMap<String, Arc<MockClient>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockFactory {
    pub fn fail_reader(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn client(&self, id: &str) -> Arc<MockClient> {
        self.clients
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn connect(
        &self,
        config: &ReaderConfig,
    ) -> Result<Arc<dyn BacnetClient>, DriverError> {
        if self.failing.lock().unwrap().contains(&config.id) {
            return Err(DriverError::Bind(
                config.ip_address.clone(),
                "simulated bind failure".to_string(),
            ));
        }
        Ok(self.client(&config.id) as Arc<dyn BacnetClient>)
    }
}

/// Receives the next message addressed to `name`, failing the test after a
/// generous timeout.
pub async fn expect_message(registry: &MailboxRegistry, name: ActorName) -> Message {
    let mailbox = registry.mailbox(name).expect("mailbox registered");
    let mut rx = mailbox.lock().await;
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("mailbox closed")
}

/// Asserts that nothing arrives for `name` within a short window.
pub async fn expect_silence(registry: &MailboxRegistry, name: ActorName) {
    let mailbox = registry.mailbox(name).expect("mailbox registered");
    let mut rx = mailbox.lock().await;
    let outcome = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(outcome.is_err(), "expected no message for {name}");
}

pub fn register_all(registry: &MailboxRegistry) {
    for name in [
        ActorName::Mqtt,
        ActorName::Bacnet,
        ActorName::BacnetWriter,
        ActorName::Uploader,
        ActorName::Cleaner,
        ActorName::Heartbeat,
        ActorName::SystemMetrics,
        ActorName::Supervisor,
    ] {
        registry.register(name).expect("register actor");
    }
}
