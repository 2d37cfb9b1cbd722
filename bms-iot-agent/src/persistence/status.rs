//! Device status snapshot: one row per device id, upserted in place by
//! several actors at once.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::retry::{with_db_retry, DEFAULT_ATTEMPTS};
use super::{Result, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MonitoringStatus {
    Active,
    Stopped,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceStatus {
    pub id: Option<i64>,
    pub device_id: String,
    pub organization_id: String,
    pub site_id: String,
    pub monitoring_status: Option<MonitoringStatus>,
    pub mqtt_connection_status: Option<ConnectionStatus>,
    pub bacnet_connection_status: Option<ConnectionStatus>,
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub uptime_seconds: Option<i64>,
    pub load_average: Option<f64>,
    pub bacnet_devices_connected: Option<i64>,
    pub bacnet_points_monitored: Option<i64>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Partial update; only the populated fields are written, everything else
/// keeps its current value.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatusUpdate {
    pub organization_id: Option<String>,
    pub site_id: Option<String>,
    pub monitoring_status: Option<MonitoringStatus>,
    pub mqtt_connection_status: Option<ConnectionStatus>,
    pub bacnet_connection_status: Option<ConnectionStatus>,
    pub cpu_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub uptime_seconds: Option<i64>,
    pub load_average: Option<f64>,
    pub bacnet_devices_connected: Option<i64>,
    pub bacnet_points_monitored: Option<i64>,
    pub payload: Option<String>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.as_ref().parse::<u32>().ok())
            .map(|code| code & 0xff == 19)
            .unwrap_or(false),
        _ => false,
    }
}

const UPDATE_STATUS_SQL: &str = "UPDATE iot_device_status SET \
    organization_id = COALESCE(?, organization_id), \
    site_id = COALESCE(?, site_id), \
    monitoring_status = COALESCE(?, monitoring_status), \
    mqtt_connection_status = COALESCE(?, mqtt_connection_status), \
    bacnet_connection_status = COALESCE(?, bacnet_connection_status), \
    cpu_usage_percent = COALESCE(?, cpu_usage_percent), \
    memory_usage_percent = COALESCE(?, memory_usage_percent), \
    disk_usage_percent = COALESCE(?, disk_usage_percent), \
    temperature_celsius = COALESCE(?, temperature_celsius), \
    uptime_seconds = COALESCE(?, uptime_seconds), \
    load_average = COALESCE(?, load_average), \
    bacnet_devices_connected = COALESCE(?, bacnet_devices_connected), \
    bacnet_points_monitored = COALESCE(?, bacnet_points_monitored), \
    payload = COALESCE(?, payload), \
    updated_at = ?, received_at = ? \
    WHERE device_id = ?";

fn bind_update<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    update: &'q DeviceStatusUpdate,
    now: DateTime<Utc>,
    device_id: &'q str,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&update.organization_id)
        .bind(&update.site_id)
        .bind(update.monitoring_status)
        .bind(update.mqtt_connection_status)
        .bind(update.bacnet_connection_status)
        .bind(update.cpu_usage_percent)
        .bind(update.memory_usage_percent)
        .bind(update.disk_usage_percent)
        .bind(update.temperature_celsius)
        .bind(update.uptime_seconds)
        .bind(update.load_average)
        .bind(update.bacnet_devices_connected)
        .bind(update.bacnet_points_monitored)
        .bind(&update.payload)
        .bind(now)
        .bind(now)
        .bind(device_id)
}

impl Store {
    /// Upserts the status row for `device_id`. Only one row may exist per
    /// device; a concurrent insert race is resolved by updating after the
    /// failed insert.
    pub async fn upsert_device_status(
        &self,
        device_id: &str,
        update: &DeviceStatusUpdate,
    ) -> Result<()> {
        with_db_retry("upsert_device_status", DEFAULT_ATTEMPTS, || {
            self.upsert_device_status_once(device_id, update)
        })
        .await
    }

    async fn upsert_device_status_once(
        &self,
        device_id: &str,
        update: &DeviceStatusUpdate,
    ) -> Result<()> {
        let now = Utc::now();

        {
            let mut conn = self.session().await;
            let updated = bind_update(sqlx::query(UPDATE_STATUS_SQL), update, now, device_id)
                .execute(&mut *conn)
                .await?;
            if updated.rows_affected() > 0 {
                return Ok(());
            }
        }

        let inserted = self.insert_device_status(device_id, update, now).await;
        match inserted {
            Ok(()) => Ok(()),
            Err(super::Error::Sqlite(e)) if is_unique_violation(&e) => {
                // Another task inserted the row first; fall back to updating it.
                debug!("Concurrent status insert for {device_id}, updating instead");
                let mut conn = self.session().await;
                bind_update(sqlx::query(UPDATE_STATUS_SQL), update, now, device_id)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_device_status(
        &self,
        device_id: &str,
        update: &DeviceStatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.session().await;
        sqlx::query(
            "INSERT INTO iot_device_status (device_id, organization_id, site_id, \
             monitoring_status, mqtt_connection_status, bacnet_connection_status, \
             cpu_usage_percent, memory_usage_percent, disk_usage_percent, \
             temperature_celsius, uptime_seconds, load_average, \
             bacnet_devices_connected, bacnet_points_monitored, payload, \
             created_at, updated_at, received_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(update.organization_id.as_deref().unwrap_or(""))
        .bind(update.site_id.as_deref().unwrap_or(""))
        .bind(update.monitoring_status)
        .bind(update.mqtt_connection_status)
        .bind(update.bacnet_connection_status)
        .bind(update.cpu_usage_percent)
        .bind(update.memory_usage_percent)
        .bind(update.disk_usage_percent)
        .bind(update.temperature_celsius)
        .bind(update.uptime_seconds)
        .bind(update.load_average)
        .bind(update.bacnet_devices_connected)
        .bind(update.bacnet_points_monitored)
        .bind(update.payload.as_deref().unwrap_or("{}"))
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn latest_device_status(&self, device_id: &str) -> Result<Option<DeviceStatus>> {
        with_db_retry("latest_device_status", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let status = sqlx::query_as::<_, DeviceStatus>(
                "SELECT * FROM iot_device_status WHERE device_id = ?",
            )
            .bind(device_id)
            .fetch_optional(&mut *conn)
            .await?;
            Ok(status)
        })
        .await
    }

    pub async fn device_status_count(&self) -> Result<i64> {
        let mut conn = self.session().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(id) FROM iot_device_status")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.0)
    }
}
