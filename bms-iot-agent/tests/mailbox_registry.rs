mod common;

use bms_iot_agent::actors::messages::{ActorName, Payload, Trigger};
use bms_iot_agent::actors::{MailboxRegistry, RegistryError};

fn trigger(reason: impl Into<String>) -> Payload {
    Payload::ImmediateUploadTrigger(Trigger {
        reason: reason.into(),
    })
}

fn reason_of(payload: &Payload) -> &str {
    match payload {
        Payload::ImmediateUploadTrigger(trigger) => &trigger.reason,
        other => panic!("unexpected payload {}", other.kind()),
    }
}

#[tokio::test]
async fn registering_the_same_name_twice_fails() {
    let registry = MailboxRegistry::new();
    registry.register(ActorName::Uploader).unwrap();
    assert!(matches!(
        registry.register(ActorName::Uploader),
        Err(RegistryError::AlreadyRegistered(ActorName::Uploader))
    ));
}

#[tokio::test]
async fn sending_to_an_unknown_recipient_fails() {
    let registry = MailboxRegistry::new();
    registry.register(ActorName::Mqtt).unwrap();

    let outcome = registry
        .send_from(ActorName::Mqtt, ActorName::Cleaner, trigger("x"))
        .await;
    assert!(matches!(
        outcome,
        Err(RegistryError::UnknownRecipient(ActorName::Cleaner))
    ));
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let registry = MailboxRegistry::new();
    registry.register(ActorName::Mqtt).unwrap();
    registry.register(ActorName::Uploader).unwrap();

    for i in 0..50 {
        registry
            .send_from(ActorName::Mqtt, ActorName::Uploader, trigger(i.to_string()))
            .await
            .unwrap();
    }

    let mailbox = registry.mailbox(ActorName::Uploader).unwrap();
    let mut rx = mailbox.lock().await;
    for i in 0..50 {
        let message = rx.recv().await.unwrap();
        assert_eq!(message.sender, ActorName::Mqtt);
        assert_eq!(message.receiver, ActorName::Uploader);
        assert_eq!(reason_of(&message.payload), i.to_string());
    }
}

#[tokio::test]
async fn full_mailboxes_apply_backpressure_instead_of_dropping() {
    use bms_iot_agent::actors::MAILBOX_CAPACITY;

    let registry = std::sync::Arc::new(MailboxRegistry::new());
    registry.register(ActorName::Mqtt).unwrap();
    registry.register(ActorName::Uploader).unwrap();

    for i in 0..MAILBOX_CAPACITY {
        registry
            .send_from(ActorName::Mqtt, ActorName::Uploader, trigger(i.to_string()))
            .await
            .unwrap();
    }

    // The next send parks until the receiver frees a slot.
    let blocked = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .send_from(ActorName::Mqtt, ActorName::Uploader, trigger("overflow"))
                .await
        })
    };
    tokio::task::yield_now().await;
    assert!(!blocked.is_finished());

    {
        let mailbox = registry.mailbox(ActorName::Uploader).unwrap();
        let mut rx = mailbox.lock().await;
        rx.recv().await.unwrap();
    }

    blocked.await.unwrap().unwrap();
}

#[tokio::test]
async fn broadcast_rewrites_the_receiver_and_honors_exclusions() {
    let registry = MailboxRegistry::new();
    registry.register(ActorName::Mqtt).unwrap();
    registry.register(ActorName::Uploader).unwrap();
    registry.register(ActorName::Cleaner).unwrap();
    registry.register(ActorName::Heartbeat).unwrap();

    registry
        .broadcast_from(ActorName::Mqtt, trigger("fanout"), &[ActorName::Cleaner])
        .await
        .unwrap();

    for name in [ActorName::Uploader, ActorName::Heartbeat] {
        let mailbox = registry.mailbox(name).unwrap();
        let mut rx = mailbox.lock().await;
        let message = rx.recv().await.unwrap();
        assert_eq!(message.sender, ActorName::Mqtt);
        assert_eq!(message.receiver, name);
        assert_eq!(reason_of(&message.payload), "fanout");
    }

    // Neither the sender nor the excluded actor got a copy.
    common::expect_silence(&registry, ActorName::Cleaner).await;
    common::expect_silence(&registry, ActorName::Mqtt).await;
}
