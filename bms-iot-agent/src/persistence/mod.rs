use std::fs::File;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use sqlx::{Connection, SqliteConnection};
use tokio::sync::{Mutex, MutexGuard};

pub mod deployment;
pub mod inventory;
pub mod points;
pub mod readers;
mod retry;
pub mod status;

pub use deployment::DeploymentConfig;
pub use points::ControllerPoint;
pub use status::{ConnectionStatus, DeviceStatus, DeviceStatusUpdate, MonitoringStatus};

/// Active sessions above this count indicate that something is holding the
/// store for too long; the agent keeps working but complains.
const SESSION_WARN_THRESHOLD: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("database schema is not initialized; run `bms-iot-agent db migrate` first")]
    SchemaMissing,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default)]
struct SessionGauge {
    active: AtomicUsize,
    total: AtomicU64,
}

/// Exclusive handle on the store connection for the duration of one logical
/// operation. Never hand this to another task; each operation acquires its
/// own session and releases it on every exit path.
pub(crate) struct Session<'a> {
    guard: MutexGuard<'a, SqliteConnection>,
    gauge: &'a SessionGauge,
}

impl Deref for Session<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Embedded relational store backing the staging pipeline, the device status
/// snapshot, the controller inventory and the deployment identity.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<SqliteConnection>>,
    gauge: Arc<SessionGauge>,
}

impl Store {
    /// Opens the database file, creating it when absent. The schema itself is
    /// managed by the migrator; see [`Store::migrate`].
    pub async fn open(path: &Path) -> Result<Store> {
        if !path.exists() {
            debug!("Creating local database file at '{}'", path.display());
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            File::create(path)?;
        }

        let conn = SqliteConnection::connect(&path.as_os_str().to_string_lossy()).await?;
        debug!("Connection to SQLite established");

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            gauge: Arc::new(SessionGauge::default()),
        })
    }

    /// Applies all pending schema migrations. Invoked from the CLI, never
    /// implicitly at agent startup.
    pub async fn migrate(&self) -> Result<()> {
        let mut conn = self.session().await;
        sqlx::migrate!("./migrations").run(&mut *conn).await?;
        Ok(())
    }

    /// Verifies that the migrator has run at least once. The agent refuses to
    /// start against an empty database file.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.session().await;
        let present: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'controller_points'",
        )
        .fetch_optional(&mut *conn)
        .await?;

        match present {
            Some(_) => Ok(()),
            None => Err(Error::SchemaMissing),
        }
    }

    pub(crate) async fn session(&self) -> Session<'_> {
        let active = self.gauge.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.gauge.total.fetch_add(1, Ordering::Relaxed);
        if active > SESSION_WARN_THRESHOLD {
            warn!("{active} store sessions active, something is hogging the database");
        }

        Session {
            guard: self.conn.lock().await,
            gauge: &self.gauge,
        }
    }

    /// (active, total) session counters, used by logs and tests.
    pub fn session_counts(&self) -> (usize, u64) {
        (
            self.gauge.active.load(Ordering::Relaxed),
            self.gauge.total.load(Ordering::Relaxed),
        )
    }
}
