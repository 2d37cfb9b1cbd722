use std::future::Future;
use std::time::Duration;

use log::warn;

use super::Error;

pub(crate) const DEFAULT_ATTEMPTS: u32 = 3;
pub(crate) const BULK_ATTEMPTS: u32 = 5;
pub(crate) const BASE_DELAY: Duration = Duration::from_millis(100);

/// Transient storage errors worth another attempt: lock contention, i/o
/// hiccups and dead connections. Session-state errors are deliberately not
/// retried; they indicate a bug at the call site, not a transient condition.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => {
            if let Some(code) = db.code() {
                // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_IOERR and extended codes
                let code = code.as_ref();
                if let Ok(numeric) = code.parse::<u32>() {
                    return matches!(numeric & 0xff, 5 | 6 | 10);
                }
            }
            let message = db.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Runs `run` up to `max_attempts` times with exponential backoff, retrying
/// only the error kinds classified by [`is_retryable`].
pub(crate) async fn with_db_retry<T, F, Fut>(
    op: &'static str,
    max_attempts: u32,
    mut run: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(Error::Sqlite(e)) if attempt + 1 < max_attempts && is_retryable(&e) => {
                attempt += 1;
                let delay = BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                warn!("{op} failed on attempt {attempt}/{max_attempts} ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
