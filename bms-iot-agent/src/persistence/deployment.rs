//! Deployment identity singleton: the {organization, site, device} triple
//! this gateway acts as. At most one row exists at any time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Connection;

use super::retry::{with_db_retry, DEFAULT_ATTEMPTS};
use super::{Result, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub organization_id: String,
    pub site_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl DeploymentConfig {
    /// Field-level validation; returns every problem found rather than just
    /// the first one.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.organization_id.trim().is_empty() {
            errors.push("organization_id is required and cannot be empty".to_string());
        }
        if self.site_id.trim().is_empty() {
            errors.push("site_id is required and cannot be empty".to_string());
        }
        if self.device_id.trim().is_empty() {
            errors.push("device_id is required and cannot be empty".to_string());
        }
        if !self.organization_id.is_empty() && !self.organization_id.starts_with("org_") {
            errors.push("organization_id should start with 'org_'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Store {
    /// Replaces the deployment configuration. The delete and the insert run
    /// in one transaction so the table never holds more than one row.
    pub async fn set_deployment_config(&self, config: &DeploymentConfig) -> Result<()> {
        let metadata = config
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = metadata.as_deref();

        with_db_retry("set_deployment_config", DEFAULT_ATTEMPTS, || async move {
            let now = Utc::now();
            let mut conn = self.session().await;
            let mut tx = conn.begin().await?;
            sqlx::query("DELETE FROM deployment_config")
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO deployment_config (organization_id, site_id, device_id, \
                 config_metadata, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&config.organization_id)
            .bind(&config.site_id)
            .bind(&config.device_id)
            .bind(metadata)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    pub async fn deployment_config(&self) -> Result<Option<DeploymentConfig>> {
        let row = with_db_retry("deployment_config", DEFAULT_ATTEMPTS, || async move {
            let mut conn = self.session().await;
            let row: Option<(String, String, String, Option<String>)> = sqlx::query_as(
                "SELECT organization_id, site_id, device_id, config_metadata \
                 FROM deployment_config ORDER BY created_at DESC LIMIT 1",
            )
            .fetch_optional(&mut *conn)
            .await?;
            Ok(row)
        })
        .await?;

        match row {
            Some((organization_id, site_id, device_id, metadata)) => {
                let metadata = metadata
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()?;
                Ok(Some(DeploymentConfig {
                    organization_id,
                    site_id,
                    device_id,
                    metadata,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn deployment_config_count(&self) -> Result<i64> {
        let mut conn = self.session().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(id) FROM deployment_config")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.0)
    }
}
