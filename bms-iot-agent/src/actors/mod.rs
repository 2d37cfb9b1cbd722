//! The in-process actor system: typed messages, the mailbox registry, the
//! long-lived actors and their supervisor.

pub mod cleaner;
pub mod heartbeat;
pub mod messages;
pub mod monitoring;
pub mod registry;
pub mod supervisor;
pub mod system_metrics;
pub mod uploader;
pub mod writer;

pub use cleaner::CleanerActor;
pub use heartbeat::HeartbeatActor;
pub use messages::{ActorName, Message, Payload};
pub use monitoring::MonitoringActor;
pub use registry::{MailboxRegistry, RegistryError, MAILBOX_CAPACITY};
pub use system_metrics::SystemMetricsActor;
pub use uploader::UploaderActor;
pub use writer::WriterActor;
