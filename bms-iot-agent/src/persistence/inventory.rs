//! Cached controller inventory. Only the most recent snapshot is kept; a new
//! upload atomically replaces the previous one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Connection;

use crate::bacnet::ObjectType;

use super::retry::{with_db_retry, DEFAULT_ATTEMPTS};
use super::{Result, Store};

/// One BACnet object of a controller, as declared by the cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub point_id: i64,
    /// Cloud-assigned stable identifier of the point.
    pub iot_device_point_id: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// One field controller with its declared object list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub vendor_id: i64,
    pub device_id: i64,
    pub controller_ip_address: String,
    pub controller_id: String,
    #[serde(default)]
    pub object_list: Vec<ObjectSpec>,
}

impl Store {
    /// Stores a new inventory snapshot, discarding the previous one in the
    /// same transaction.
    pub async fn save_inventory(&self, controllers: &[ControllerSpec]) -> Result<()> {
        let json = serde_json::to_string(controllers)?;
        let json = json.as_str();
        with_db_retry("save_inventory", DEFAULT_ATTEMPTS, || async move {
            let now = Utc::now();
            let mut conn = self.session().await;
            let mut tx = conn.begin().await?;
            sqlx::query("DELETE FROM bacnet_config")
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO bacnet_config (bacnet_devices, created_at, updated_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(json)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// The most recent inventory snapshot, if any was ever uploaded.
    pub async fn load_inventory(&self) -> Result<Option<Vec<ControllerSpec>>> {
        let json = with_db_retry("load_inventory", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let row: Option<(Option<String>,)> = sqlx::query_as(
                "SELECT bacnet_devices FROM bacnet_config ORDER BY created_at DESC LIMIT 1",
            )
            .fetch_optional(&mut *conn)
            .await?;
            Ok(row.and_then(|(devices,)| devices))
        })
        .await?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
