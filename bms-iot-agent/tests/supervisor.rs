mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bms_iot_agent::actors::messages::{ActorName, DeviceReboot, Payload};
use bms_iot_agent::actors::supervisor::{run_reboot_listener, supervise, MAX_FAILURES};
use bms_iot_agent::actors::MailboxRegistry;

#[tokio::test(start_paused = true)]
async fn crashes_are_retried_until_the_limit() {
    let attempts = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let outcome = {
        let attempts = attempts.clone();
        supervise("flaky", cancel, move || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
        })
        .await
    };

    assert!(outcome.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), MAX_FAILURES);
}

#[tokio::test(start_paused = true)]
async fn an_actor_that_recovers_keeps_running() {
    let attempts = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let outcome = {
        let attempts = attempts.clone();
        supervise("recovering", cancel, move || {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first start fails")
                }
                Ok(())
            }
        })
        .await
    };

    assert!(outcome.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reboot_command_cancels_the_run_token() {
    let registry = Arc::new(MailboxRegistry::new());
    registry.register(ActorName::Supervisor).unwrap();
    let cancel = CancellationToken::new();

    let listener = tokio::spawn(run_reboot_listener(registry.clone(), cancel.clone()));

    registry
        .send_from(
            ActorName::Mqtt,
            ActorName::Supervisor,
            Payload::DeviceReboot(DeviceReboot {
                device_id: "device-1".to_string(),
                command_id: Some("cmd-r".to_string()),
            }),
        )
        .await
        .unwrap();

    listener.await.unwrap().unwrap();
    assert!(cancel.is_cancelled());
}
