//! Process-wide directory from actor name to bounded FIFO mailbox. Sending
//! into a full mailbox suspends the sender until space frees up; nothing is
//! ever dropped silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use log::{info, trace};
use tokio::sync::{mpsc, Mutex};

use super::messages::{ActorName, Message, Payload};

pub const MAILBOX_CAPACITY: usize = 64;

pub type MailboxReceiver = Arc<Mutex<mpsc::Receiver<Message>>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("actor {0} is already registered")]
    AlreadyRegistered(ActorName),
    #[error("no mailbox registered for actor {0}")]
    UnknownRecipient(ActorName),
    #[error("mailbox of actor {0} is closed")]
    Closed(ActorName),
}

struct Mailbox {
    tx: mpsc::Sender<Message>,
    rx: MailboxReceiver,
}

/// Registry supporting point-to-point and broadcast messaging. Mailboxes
/// survive actor restarts; a restarted actor reacquires its receiver and
/// continues draining where the crashed incarnation stopped.
#[derive(Default)]
pub struct MailboxRegistry {
    mailboxes: StdMutex<HashMap<ActorName, Mailbox>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        MailboxRegistry::default()
    }

    pub fn register(&self, name: ActorName) -> Result<(), RegistryError> {
        let mut mailboxes = self.mailboxes.lock().expect("registry lock poisoned");
        if mailboxes.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        mailboxes.insert(
            name,
            Mailbox {
                tx,
                rx: Arc::new(Mutex::new(rx)),
            },
        );
        info!("Registered actor: {name}");
        Ok(())
    }

    /// The receiving end of an actor's mailbox. The actor locks it for the
    /// duration of its run; the lock outliving a crash is what preserves
    /// undrained messages across restarts.
    pub fn mailbox(&self, name: ActorName) -> Result<MailboxReceiver, RegistryError> {
        let mailboxes = self.mailboxes.lock().expect("registry lock poisoned");
        mailboxes
            .get(&name)
            .map(|mailbox| mailbox.rx.clone())
            .ok_or(RegistryError::UnknownRecipient(name))
    }

    pub async fn send_from(
        &self,
        sender: ActorName,
        receiver: ActorName,
        payload: Payload,
    ) -> Result<(), RegistryError> {
        self.send(Message {
            sender,
            receiver,
            payload,
        })
        .await
    }

    pub async fn send(&self, message: Message) -> Result<(), RegistryError> {
        let receiver = message.receiver;
        let tx = {
            let mailboxes = self.mailboxes.lock().expect("registry lock poisoned");
            mailboxes
                .get(&receiver)
                .map(|mailbox| mailbox.tx.clone())
                .ok_or(RegistryError::UnknownRecipient(receiver))?
        };

        trace!(
            "{} -> {}: {}",
            message.sender,
            receiver,
            message.payload.kind()
        );
        tx.send(message)
            .await
            .map_err(|_| RegistryError::Closed(receiver))
    }

    /// Delivers a copy to every registered mailbox except the sender and the
    /// excluded set; each copy's receiver field names its own recipient.
    pub async fn broadcast_from(
        &self,
        sender: ActorName,
        payload: Payload,
        exclude: &[ActorName],
    ) -> Result<(), RegistryError> {
        let recipients: Vec<(ActorName, mpsc::Sender<Message>)> = {
            let mailboxes = self.mailboxes.lock().expect("registry lock poisoned");
            mailboxes
                .iter()
                .filter(|(name, _)| **name != sender && !exclude.contains(name))
                .map(|(name, mailbox)| (*name, mailbox.tx.clone()))
                .collect()
        };

        for (name, tx) in recipients {
            trace!("{sender} -> {name} (broadcast): {}", payload.kind());
            tx.send(Message {
                sender,
                receiver: name,
                payload: payload.clone(),
            })
            .await
            .map_err(|_| RegistryError::Closed(name))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MailboxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.mailboxes.lock().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("MailboxRegistry")
            .field("mailboxes", &count)
            .finish()
    }
}
