mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bms_iot_agent::actors::messages::{
    ActorName, ConfigUploadRequest, MonitoringControl, Payload,
};
use bms_iot_agent::actors::{MailboxRegistry, MonitoringActor};
use bms_iot_agent::bacnet::{ObjectType, ReaderPool};
use bms_iot_agent::persistence::{
    DeploymentConfig, DeviceStatusUpdate, MonitoringStatus, Store,
};

use common::{
    controller_spec, expect_message, reader_config, register_all, test_store, MockFactory,
};

fn identity() -> DeploymentConfig {
    DeploymentConfig {
        organization_id: "org_1".to_string(),
        site_id: "site-1".to_string(),
        device_id: "device-1".to_string(),
        metadata: None,
    }
}

async fn seed_status(store: &Store, status: MonitoringStatus) {
    store
        .upsert_device_status(
            "device-1",
            &DeviceStatusUpdate {
                organization_id: Some("org_1".to_string()),
                site_id: Some("site-1".to_string()),
                monitoring_status: Some(status),
                ..DeviceStatusUpdate::default()
            },
        )
        .await
        .unwrap();
}

struct Harness {
    registry: Arc<MailboxRegistry>,
    store: Store,
    pool: Arc<ReaderPool>,
    cancel: CancellationToken,
    actor: tokio::task::JoinHandle<anyhow::Result<()>>,
    _dir: tempfile::TempDir,
}

async fn spawn_actor(initial_status: MonitoringStatus) -> Harness {
    let (store, dir) = test_store().await;
    seed_status(&store, initial_status).await;

    let registry = Arc::new(MailboxRegistry::new());
    register_all(&registry);

    let pool = Arc::new(ReaderPool::new(Arc::new(MockFactory::default())));
    let cancel = CancellationToken::new();

    let actor = MonitoringActor::new(
        registry.clone(),
        store.clone(),
        pool.clone(),
        identity(),
        cancel.clone(),
    );
    let handle = tokio::spawn(async move { actor.start().await });

    Harness {
        registry,
        store,
        pool,
        cancel,
        actor: handle,
        _dir: dir,
    }
}

impl Harness {
    async fn shutdown(self) {
        self.cancel.cancel();
        self.actor.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn config_upload_without_readers_stops_monitoring_but_still_answers() {
    let harness = spawn_actor(MonitoringStatus::Active).await;

    let request = ConfigUploadRequest {
        url_to_upload_config: "https://cloud.example/config".to_string(),
        jwt_token: "jwt".to_string(),
        iot_device_controllers: vec![controller_spec(
            "ctl-1",
            "10.0.1.50",
            vec![(ObjectType::AnalogInput, 1, "pt-1")],
        )],
        bacnet_readers: Vec::new(),
    };
    harness
        .registry
        .send_from(
            ActorName::Mqtt,
            ActorName::Bacnet,
            Payload::ConfigUploadRequest(request),
        )
        .await
        .unwrap();

    // The response reaches the uploader even though no readers came along.
    let message = expect_message(&harness.registry, ActorName::Uploader).await;
    match message.payload {
        Payload::ConfigUploadResponse(response) => {
            assert!(response.success);
            assert!(response.request.is_some());
        }
        other => panic!("unexpected payload {}", other.kind()),
    }

    let status = harness
        .store
        .latest_device_status("device-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.monitoring_status, Some(MonitoringStatus::Stopped));

    // No reader pool, no polling: nothing may land in the staging table.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(harness.store.point_count().await.unwrap(), 0);
    assert!(harness.pool.snapshot().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn config_upload_with_readers_rebuilds_the_pool_and_persists_them() {
    let harness = spawn_actor(MonitoringStatus::Active).await;

    let request = ConfigUploadRequest {
        url_to_upload_config: "https://cloud.example/config".to_string(),
        jwt_token: "jwt".to_string(),
        iot_device_controllers: vec![controller_spec(
            "ctl-1",
            "10.0.1.50",
            vec![(ObjectType::AnalogInput, 1, "pt-1")],
        )],
        bacnet_readers: vec![
            reader_config("reader-a", "10.0.1.2", 24, 47808),
            reader_config("reader-b", "10.0.2.2", 24, 47808),
        ],
    };
    harness
        .registry
        .send_from(
            ActorName::Mqtt,
            ActorName::Bacnet,
            Payload::ConfigUploadRequest(request),
        )
        .await
        .unwrap();

    let message = expect_message(&harness.registry, ActorName::Uploader).await;
    match message.payload {
        Payload::ConfigUploadResponse(response) => assert!(response.success),
        other => panic!("unexpected payload {}", other.kind()),
    }

    assert_eq!(harness.pool.snapshot().len(), 2);
    assert!(harness.pool.is_initialized());

    let saved = harness.store.bacnet_readers("device-1").await.unwrap();
    assert_eq!(saved.len(), 2);

    let inventory = harness.store.load_inventory().await.unwrap().unwrap();
    assert_eq!(inventory.len(), 1);
    assert_eq!(inventory[0].controller_id, "ctl-1");

    harness.shutdown().await;
}

#[tokio::test]
async fn start_and_stop_commands_answer_and_force_a_heartbeat() {
    let harness = spawn_actor(MonitoringStatus::Stopped).await;

    harness
        .registry
        .send_from(
            ActorName::Mqtt,
            ActorName::Bacnet,
            Payload::StartMonitoringRequest(MonitoringControl {
                command_id: Some("cmd-1".to_string()),
            }),
        )
        .await
        .unwrap();

    let heartbeat = expect_message(&harness.registry, ActorName::Heartbeat).await;
    assert!(matches!(heartbeat.payload, Payload::ForceHeartbeatRequest(_)));

    let response = expect_message(&harness.registry, ActorName::Mqtt).await;
    match response.payload {
        Payload::StartMonitoringResponse(response) => {
            assert!(response.success);
            assert_eq!(response.command_id.as_deref(), Some("cmd-1"));
        }
        other => panic!("unexpected payload {}", other.kind()),
    }

    let status = harness
        .store
        .latest_device_status("device-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.monitoring_status, Some(MonitoringStatus::Active));

    harness
        .registry
        .send_from(
            ActorName::Mqtt,
            ActorName::Bacnet,
            Payload::StopMonitoringRequest(MonitoringControl {
                command_id: Some("cmd-2".to_string()),
            }),
        )
        .await
        .unwrap();

    let _heartbeat = expect_message(&harness.registry, ActorName::Heartbeat).await;
    let response = expect_message(&harness.registry, ActorName::Mqtt).await;
    match response.payload {
        Payload::StopMonitoringResponse(response) => {
            assert!(response.success);
            assert_eq!(response.command_id.as_deref(), Some("cmd-2"));
        }
        other => panic!("unexpected payload {}", other.kind()),
    }

    let status = harness
        .store
        .latest_device_status("device-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.monitoring_status, Some(MonitoringStatus::Stopped));

    harness.shutdown().await;
}
