//! Deletes staging rows the broker has already acknowledged.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::persistence::Store;

use super::registry::MailboxRegistry;

const CLEAN_INTERVAL: Duration = Duration::from_secs(10);

pub struct CleanerActor {
    // Kept for parity with the other actors; the cleaner currently has no
    // inbound messages.
    _registry: Arc<MailboxRegistry>,
    store: Store,
    cancel: CancellationToken,
}

impl CleanerActor {
    pub fn new(registry: Arc<MailboxRegistry>, store: Store, cancel: CancellationToken) -> Self {
        CleanerActor {
            _registry: registry,
            store,
            cancel,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!("CleanerActor started");
        let mut tick = tokio::time::interval(CLEAN_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tick.tick() => self.delete_uploaded_points().await,
            }
        }
    }

    async fn delete_uploaded_points(&self) {
        match self.store.delete_uploaded_points().await {
            Ok(0) => info!("CleanerActor found no uploaded points to delete"),
            Ok(deleted) => info!("CleanerActor deleted {deleted} uploaded points"),
            Err(e) => error!("CleanerActor failed to delete uploaded points: {e}"),
        }
    }
}
