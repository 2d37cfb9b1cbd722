//! Restarts crashed actors with a fixed delay and gives up after repeated
//! failures. Also hosts the reboot listener that turns a DEVICE_REBOOT
//! command into a cooperative shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::messages::{ActorName, Payload};
use super::registry::MailboxRegistry;

pub const RESTART_DELAY: Duration = Duration::from_secs(5);
pub const MAX_FAILURES: u32 = 3;

/// Runs `start` until it returns cleanly, restarting it after crashes. The
/// failure counter is cumulative over the actor's lifetime; it does not
/// reset after a successful stretch of work.
pub async fn supervise<F, Fut>(
    name: &str,
    cancel: CancellationToken,
    mut start: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut failures: u32 = 0;

    loop {
        info!("[supervisor] starting {name}");
        match start().await {
            Ok(()) => {
                info!("[supervisor] {name} stopped cleanly");
                return Ok(());
            }
            Err(e) => {
                failures += 1;
                error!("[supervisor] {name} crashed ({failures}/{MAX_FAILURES}): {e:?}");
                if failures >= MAX_FAILURES {
                    return Err(e.context(format!(
                        "{name} crashed {failures} times, giving up"
                    )));
                }
            }
        }

        select! {
            _ = cancel.cancelled() => {
                warn!("[supervisor] shutdown requested while {name} was down");
                return Ok(());
            }
            _ = tokio::time::sleep(RESTART_DELAY) => {}
        }
    }
}

/// Waits for a DEVICE_REBOOT command and cancels the run token. The service
/// manager is expected to bring the process back up.
pub async fn run_reboot_listener(
    registry: Arc<MailboxRegistry>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mailbox = registry.mailbox(ActorName::Supervisor)?;
    let mut rx = mailbox.lock().await;

    loop {
        select! {
            _ = cancel.cancelled() => return Ok(()),
            message = rx.recv() => {
                let Some(message) = message else { return Ok(()) };
                match message.payload {
                    Payload::DeviceReboot(reboot) => {
                        info!(
                            "Reboot requested for device {} (command {:?}), shutting down",
                            reboot.device_id, reboot.command_id
                        );
                        cancel.cancel();
                        return Ok(());
                    }
                    other => {
                        warn!("[supervisor] Unhandled message type: {}", other.kind());
                    }
                }
            }
        }
    }
}
