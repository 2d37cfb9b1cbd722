//! Edge agent for the OpenBMS IoT platform.
//!
//! The agent polls a fleet of BACnet/IP field controllers, stages the
//! readings in an embedded SQLite store, publishes them to the cloud message
//! bus with at-least-once semantics, applies commands received from that bus
//! and emits periodic health telemetry. Internally it is a set of long-lived
//! supervised tasks exchanging typed messages through bounded mailboxes on a
//! single-threaded runtime.

pub mod actors;
pub mod bacnet;
pub mod cloud;
pub mod ids;
pub mod mqtt;
pub mod persistence;
pub mod settings;

pub use actors::{ActorName, MailboxRegistry};
pub use persistence::{DeploymentConfig, Store};
pub use settings::Settings;
