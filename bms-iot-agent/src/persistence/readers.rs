//! Persistence of reader configurations so the pool can be rebuilt after a
//! restart without waiting for the cloud to resend them.

use chrono::{DateTime, Utc};
use log::info;
use sqlx::Connection;

use crate::bacnet::ReaderConfig;

use super::retry::{with_db_retry, DEFAULT_ATTEMPTS};
use super::status::ConnectionStatus;
use super::{Result, Store};

#[derive(Debug, sqlx::FromRow)]
struct ReaderRow {
    id: String,
    ip_address: String,
    subnet_mask: i64,
    bacnet_device_id: i64,
    port: i64,
    bbmd_enabled: bool,
    bbmd_server_ip: Option<String>,
    is_active: bool,
}

impl From<ReaderRow> for ReaderConfig {
    fn from(row: ReaderRow) -> Self {
        ReaderConfig {
            id: row.id,
            ip_address: row.ip_address,
            subnet_mask: row.subnet_mask as u8,
            bacnet_device_id: row.bacnet_device_id,
            port: row.port as u16,
            bbmd_enabled: row.bbmd_enabled,
            bbmd_server_ip: row.bbmd_server_ip,
            is_active: row.is_active,
        }
    }
}

impl Store {
    /// Replaces the reader set for a device: the previous rows are deleted
    /// and the new ones inserted in the same transaction.
    pub async fn save_bacnet_readers(
        &self,
        device_id: &str,
        readers: &[ReaderConfig],
    ) -> Result<()> {
        with_db_retry("save_bacnet_readers", DEFAULT_ATTEMPTS, || {
            self.save_readers_once(device_id, readers)
        })
        .await?;
        info!("Saved {} BACnet readers for device {device_id}", readers.len());
        Ok(())
    }

    async fn save_readers_once(&self, device_id: &str, readers: &[ReaderConfig]) -> Result<()> {
        let now = Utc::now();
        let mut conn = self.session().await;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM bacnet_readers WHERE device_id = ?")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        for reader in readers {
            sqlx::query(
                "INSERT INTO bacnet_readers (id, device_id, ip_address, subnet_mask, \
                 bacnet_device_id, port, bbmd_enabled, bbmd_server_ip, is_active, \
                 connection_status, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&reader.id)
            .bind(device_id)
            .bind(&reader.ip_address)
            .bind(reader.subnet_mask as i64)
            .bind(reader.bacnet_device_id)
            .bind(reader.port as i64)
            .bind(reader.bbmd_enabled)
            .bind(&reader.bbmd_server_ip)
            .bind(reader.is_active)
            .bind(ConnectionStatus::Disconnected)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Active readers for a device, oldest first.
    pub async fn bacnet_readers(&self, device_id: &str) -> Result<Vec<ReaderConfig>> {
        with_db_retry("bacnet_readers", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let rows = sqlx::query_as::<_, ReaderRow>(
                "SELECT id, ip_address, subnet_mask, bacnet_device_id, port, \
                 bbmd_enabled, bbmd_server_ip, is_active \
                 FROM bacnet_readers \
                 WHERE device_id = ? AND is_active = 1 \
                 ORDER BY created_at ASC",
            )
            .bind(device_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(ReaderConfig::from).collect())
        })
        .await
    }

    /// Records a reader connection transition; `last_connected_at` is bumped
    /// only on the transition to connected.
    pub async fn update_reader_connection(
        &self,
        reader_id: &str,
        status: ConnectionStatus,
    ) -> Result<()> {
        with_db_retry("update_reader_connection", DEFAULT_ATTEMPTS, || async move {
            let now = Utc::now();
            let last_connected_at: Option<DateTime<Utc>> =
                (status == ConnectionStatus::Connected).then_some(now);

            let mut conn = self.session().await;
            sqlx::query(
                "UPDATE bacnet_readers SET connection_status = ?, updated_at = ?, \
                 last_connected_at = COALESCE(?, last_connected_at) \
                 WHERE id = ?",
            )
            .bind(status)
            .bind(now)
            .bind(last_connected_at)
            .bind(reader_id)
            .execute(&mut *conn)
            .await?;
            Ok(())
        })
        .await
    }
}
