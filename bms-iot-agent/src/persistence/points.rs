//! Staging rows for controller point samples. Rows are inserted with
//! `is_uploaded = false`, flipped to `true` exactly once after the broker
//! acknowledges them, and eventually deleted by the cleaner.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sqlx::Connection;

use crate::bacnet::ObjectType;

use super::retry::{with_db_retry, BULK_ATTEMPTS, DEFAULT_ATTEMPTS};
use super::{Result, Store};

pub const UPLOAD_BATCH_SIZE: i64 = 100;

/// One sample of one point of one controller, as staged for upload.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ControllerPoint {
    /// Store-assigned surrogate id; `None` (or a coerced `0`) before insert.
    pub id: Option<i64>,
    pub controller_ip_address: String,
    pub controller_port: i64,
    pub bacnet_object_type: ObjectType,
    pub point_id: i64,
    pub iot_device_point_id: String,
    pub controller_id: String,
    pub controller_device_id: String,
    pub units: Option<String>,
    pub present_value: Option<String>,
    pub is_uploaded: bool,

    pub status_flags: Option<String>,
    pub event_state: Option<String>,
    pub out_of_service: Option<bool>,
    pub reliability: Option<String>,

    pub min_pres_value: Option<f64>,
    pub max_pres_value: Option<f64>,
    pub high_limit: Option<f64>,
    pub low_limit: Option<f64>,
    pub resolution: Option<f64>,
    pub priority_array: Option<String>,
    pub relinquish_default: Option<f64>,
    pub cov_increment: Option<f64>,
    pub time_delay: Option<i64>,
    pub time_delay_normal: Option<i64>,
    pub notification_class: Option<i64>,
    pub notify_type: Option<String>,
    pub deadband: Option<f64>,
    pub limit_enable: Option<String>,
    pub event_enable: Option<String>,
    pub acked_transitions: Option<String>,
    pub event_time_stamps: Option<String>,
    pub event_message_texts: Option<String>,
    pub event_message_texts_config: Option<String>,
    pub event_detection_enable: Option<bool>,
    pub event_algorithm_inhibit_ref: Option<String>,
    pub event_algorithm_inhibit: Option<bool>,
    pub reliability_evaluation_inhibit: Option<bool>,

    pub error_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived from `created_at` by the store; never written by the agent.
    pub created_at_millis: Option<i64>,
}

impl ControllerPoint {
    /// A fresh, not-yet-uploaded sample with the mandatory identity fields
    /// set and everything optional left empty.
    pub fn new(
        controller_ip_address: impl Into<String>,
        controller_port: i64,
        bacnet_object_type: ObjectType,
        point_id: i64,
        iot_device_point_id: impl Into<String>,
        controller_id: impl Into<String>,
        controller_device_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        ControllerPoint {
            id: None,
            controller_ip_address: controller_ip_address.into(),
            controller_port,
            bacnet_object_type,
            point_id,
            iot_device_point_id: iot_device_point_id.into(),
            controller_id: controller_id.into(),
            controller_device_id: controller_device_id.into(),
            units: None,
            present_value: None,
            is_uploaded: false,
            status_flags: None,
            event_state: None,
            out_of_service: None,
            reliability: None,
            min_pres_value: None,
            max_pres_value: None,
            high_limit: None,
            low_limit: None,
            resolution: None,
            priority_array: None,
            relinquish_default: None,
            cov_increment: None,
            time_delay: None,
            time_delay_normal: None,
            notification_class: None,
            notify_type: None,
            deadband: None,
            limit_enable: None,
            event_enable: None,
            acked_transitions: None,
            event_time_stamps: None,
            event_message_texts: None,
            event_message_texts_config: None,
            event_detection_enable: None,
            event_algorithm_inhibit_ref: None,
            event_algorithm_inhibit: None,
            reliability_evaluation_inhibit: None,
            error_info: None,
            created_at: now,
            updated_at: now,
            created_at_millis: None,
        }
    }
}

const INSERT_POINT_SQL: &str = "INSERT INTO controller_points (\
    controller_ip_address, controller_port, bacnet_object_type, point_id, \
    iot_device_point_id, controller_id, controller_device_id, units, \
    present_value, is_uploaded, status_flags, event_state, out_of_service, \
    reliability, min_pres_value, max_pres_value, high_limit, low_limit, \
    resolution, priority_array, relinquish_default, cov_increment, \
    time_delay, time_delay_normal, notification_class, notify_type, \
    deadband, limit_enable, event_enable, acked_transitions, \
    event_time_stamps, event_message_texts, event_message_texts_config, \
    event_detection_enable, event_algorithm_inhibit_ref, \
    event_algorithm_inhibit, reliability_evaluation_inhibit, error_info, \
    created_at, updated_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn bind_point<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    point: &'q ControllerPoint,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&point.controller_ip_address)
        .bind(point.controller_port)
        .bind(&point.bacnet_object_type)
        .bind(point.point_id)
        .bind(&point.iot_device_point_id)
        .bind(&point.controller_id)
        .bind(&point.controller_device_id)
        .bind(&point.units)
        .bind(&point.present_value)
        .bind(point.is_uploaded)
        .bind(&point.status_flags)
        .bind(&point.event_state)
        .bind(point.out_of_service)
        .bind(&point.reliability)
        .bind(point.min_pres_value)
        .bind(point.max_pres_value)
        .bind(point.high_limit)
        .bind(point.low_limit)
        .bind(point.resolution)
        .bind(&point.priority_array)
        .bind(point.relinquish_default)
        .bind(point.cov_increment)
        .bind(point.time_delay)
        .bind(point.time_delay_normal)
        .bind(point.notification_class)
        .bind(&point.notify_type)
        .bind(point.deadband)
        .bind(&point.limit_enable)
        .bind(&point.event_enable)
        .bind(&point.acked_transitions)
        .bind(&point.event_time_stamps)
        .bind(&point.event_message_texts)
        .bind(&point.event_message_texts_config)
        .bind(point.event_detection_enable)
        .bind(&point.event_algorithm_inhibit_ref)
        .bind(point.event_algorithm_inhibit)
        .bind(point.reliability_evaluation_inhibit)
        .bind(&point.error_info)
        .bind(point.created_at)
        .bind(point.updated_at)
}

impl Store {
    /// Inserts a single staging row and returns it with the store-assigned id.
    pub async fn insert_point(&self, mut point: ControllerPoint) -> Result<ControllerPoint> {
        if point.id == Some(0) {
            warn!(
                "Staging row for point {} carries id=0, treating it as unassigned",
                point.point_id
            );
            point.id = None;
        }

        let id = with_db_retry("insert_point", DEFAULT_ATTEMPTS, || {
            self.insert_point_once(&point)
        })
        .await?;

        point.id = Some(id);
        Ok(point)
    }

    async fn insert_point_once(&self, point: &ControllerPoint) -> Result<i64> {
        let mut conn = self.session().await;
        let result = bind_point(sqlx::query(INSERT_POINT_SQL), point)
            .execute(&mut *conn)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Inserts a batch of staging rows in a single transaction. Ids equal to
    /// zero are coerced to unassigned so the store allocates them. The rows
    /// are deliberately not re-fetched afterwards.
    pub async fn bulk_insert_points(&self, mut points: Vec<ControllerPoint>) -> Result<usize> {
        if points.is_empty() {
            debug!("No points to insert, skipping bulk insert");
            return Ok(0);
        }

        for point in &mut points {
            if point.id == Some(0) {
                warn!(
                    "Staging row for point {} carries id=0, treating it as unassigned",
                    point.point_id
                );
                point.id = None;
            }
        }

        let count = points.len();
        with_db_retry("bulk_insert_points", BULK_ATTEMPTS, || {
            self.bulk_insert_once(&points)
        })
        .await?;

        info!("Bulk inserted {count} controller points");
        Ok(count)
    }

    async fn bulk_insert_once(&self, points: &[ControllerPoint]) -> Result<()> {
        let mut conn = self.session().await;
        let mut tx = conn.begin().await?;
        for point in points {
            bind_point(sqlx::query(INSERT_POINT_SQL), point)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Oldest unuploaded rows, capped at [`UPLOAD_BATCH_SIZE`].
    pub async fn points_to_upload(&self) -> Result<Vec<ControllerPoint>> {
        with_db_retry("points_to_upload", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let points = sqlx::query_as::<_, ControllerPoint>(
                "SELECT * FROM controller_points WHERE is_uploaded = 0 \
                 ORDER BY created_at ASC LIMIT ?",
            )
            .bind(UPLOAD_BATCH_SIZE)
            .fetch_all(&mut *conn)
            .await?;
            Ok(points)
        })
        .await
    }

    /// Flips `is_uploaded` to true for the given ids in one statement. An
    /// empty id list is a no-op.
    pub async fn mark_points_uploaded(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        with_db_retry("mark_points_uploaded", DEFAULT_ATTEMPTS, || async move {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql =
                format!("UPDATE controller_points SET is_uploaded = 1 WHERE id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in ids {
                query = query.bind(id);
            }

            let mut conn = self.session().await;
            query.execute(&mut *conn).await?;
            Ok(())
        })
        .await
    }

    /// Deletes rows already acknowledged by the broker. Rows still awaiting
    /// upload are never touched.
    pub async fn delete_uploaded_points(&self) -> Result<u64> {
        with_db_retry("delete_uploaded_points", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let result = sqlx::query("DELETE FROM controller_points WHERE is_uploaded = 1")
                .execute(&mut *conn)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    pub async fn point_by_id(&self, id: i64) -> Result<Option<ControllerPoint>> {
        with_db_retry("point_by_id", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let point =
                sqlx::query_as::<_, ControllerPoint>("SELECT * FROM controller_points WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
            Ok(point)
        })
        .await
    }

    pub async fn point_count(&self) -> Result<i64> {
        let mut conn = self.session().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(id) FROM controller_points")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.0)
    }
}
