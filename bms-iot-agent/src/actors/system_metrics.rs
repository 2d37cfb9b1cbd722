//! Samples host metrics and folds them into the device status row.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use sysinfo::{Components, Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::persistence::{DeploymentConfig, DeviceStatusUpdate, Store};

use super::messages::{ActorName, Message};
use super::registry::MailboxRegistry;

const COLLECTION_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone)]
struct HostMetrics {
    cpu_usage_percent: Option<f64>,
    memory_usage_percent: Option<f64>,
    disk_usage_percent: Option<f64>,
    temperature_celsius: Option<f64>,
    uptime_seconds: Option<i64>,
    load_average: Option<f64>,
}

pub struct SystemMetricsActor {
    registry: Arc<MailboxRegistry>,
    store: Store,
    identity: DeploymentConfig,
    cancel: CancellationToken,
}

impl SystemMetricsActor {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        store: Store,
        identity: DeploymentConfig,
        cancel: CancellationToken,
    ) -> Self {
        SystemMetricsActor {
            registry,
            store,
            identity,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!(
            "SystemMetricsActor started for device {}",
            self.identity.device_id
        );
        let mailbox = self.registry.mailbox(ActorName::SystemMetrics)?;
        let mut rx = mailbox.lock().await;

        let mut tick = tokio::time::interval(COLLECTION_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => self.collect_and_store().await,
                message = rx.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    self.handle_message(message);
                }
            }
        }
    }

    fn handle_message(&self, message: Message) {
        // No inbound messages are expected here yet.
        warn!(
            "[SystemMetricsActor] Unhandled message type: {}",
            message.payload.kind()
        );
    }

    async fn collect_and_store(&self) {
        let metrics = match tokio::task::spawn_blocking(collect_host_metrics).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!("Metrics collection task failed: {e}");
                return;
            }
        };

        let update = DeviceStatusUpdate {
            organization_id: Some(self.identity.organization_id.clone()),
            site_id: Some(self.identity.site_id.clone()),
            cpu_usage_percent: metrics.cpu_usage_percent,
            memory_usage_percent: metrics.memory_usage_percent,
            disk_usage_percent: metrics.disk_usage_percent,
            temperature_celsius: metrics.temperature_celsius,
            uptime_seconds: metrics.uptime_seconds,
            load_average: metrics.load_average,
            ..DeviceStatusUpdate::default()
        };

        match self
            .store
            .upsert_device_status(&self.identity.device_id, &update)
            .await
        {
            Ok(()) => debug!(
                "Updated system metrics for device {}",
                self.identity.device_id
            ),
            Err(e) => error!("Failed to store system metrics: {e}"),
        }
    }
}

/// Runs on the blocking pool; the CPU sample needs two refreshes a short
/// interval apart.
fn collect_host_metrics() -> HostMetrics {
    let mut metrics = HostMetrics::default();

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    metrics.cpu_usage_percent = Some(f64::from(sys.global_cpu_usage()));

    let total_memory = sys.total_memory();
    if total_memory > 0 {
        metrics.memory_usage_percent =
            Some(sys.used_memory() as f64 / total_memory as f64 * 100.0);
    }

    let disks = Disks::new_with_refreshed_list();
    let root_disk = disks
        .iter()
        .find(|disk| disk.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next());
    if let Some(disk) = root_disk {
        let total = disk.total_space();
        if total > 0 {
            let used = total.saturating_sub(disk.available_space());
            metrics.disk_usage_percent = Some(used as f64 / total as f64 * 100.0);
        }
    }

    metrics.uptime_seconds = i64::try_from(System::uptime()).ok();

    let load = System::load_average();
    metrics.load_average = Some(load.one);

    let components = Components::new_with_refreshed_list();
    metrics.temperature_celsius = components
        .iter()
        .find_map(|component| component.temperature())
        .map(f64::from);

    metrics
}
