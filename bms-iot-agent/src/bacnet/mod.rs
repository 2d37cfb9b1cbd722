//! BACnet domain types and the infrastructure shared by the monitoring and
//! writer actors: the protocol driver seam, the reader pool with its load
//! balancer, and the property health processor.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub mod balancer;
pub mod driver;
pub mod health;
pub mod poll;
pub mod pool;
pub mod reader;

pub use balancer::{LoadBalancer, Strategy};
pub use driver::{BacnetClient, ClientFactory, DiscoveredDevice, DriverError, UdpClientFactory};
pub use poll::PollEngine;
pub use pool::ReaderPool;
pub use reader::Reader;

/// BACnet object types the agent monitors. Rendered in the camel-cased form
/// used on the wire and in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
    Device,
}

impl ObjectType {
    /// Numeric object-type code from the BACnet standard.
    pub fn type_code(self) -> u16 {
        match self {
            ObjectType::AnalogInput => 0,
            ObjectType::AnalogOutput => 1,
            ObjectType::AnalogValue => 2,
            ObjectType::BinaryInput => 3,
            ObjectType::BinaryOutput => 4,
            ObjectType::BinaryValue => 5,
            ObjectType::Device => 8,
            ObjectType::MultiStateInput => 13,
            ObjectType::MultiStateOutput => 14,
            ObjectType::MultiStateValue => 19,
        }
    }

    pub fn is_analog(self) -> bool {
        matches!(
            self,
            ObjectType::AnalogInput | ObjectType::AnalogOutput | ObjectType::AnalogValue
        )
    }

    pub fn is_commandable(self) -> bool {
        matches!(
            self,
            ObjectType::AnalogOutput
                | ObjectType::AnalogValue
                | ObjectType::BinaryOutput
                | ObjectType::BinaryValue
                | ObjectType::MultiStateOutput
                | ObjectType::MultiStateValue
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::AnalogInput => "analogInput",
            ObjectType::AnalogOutput => "analogOutput",
            ObjectType::AnalogValue => "analogValue",
            ObjectType::BinaryInput => "binaryInput",
            ObjectType::BinaryOutput => "binaryOutput",
            ObjectType::BinaryValue => "binaryValue",
            ObjectType::MultiStateInput => "multiStateInput",
            ObjectType::MultiStateOutput => "multiStateOutput",
            ObjectType::MultiStateValue => "multiStateValue",
            ObjectType::Device => "device",
        };
        f.write_str(name)
    }
}

/// One object of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

/// Properties the agent reads from field controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    PresentValue,
    Units,
    StatusFlags,
    EventState,
    OutOfService,
    Reliability,
    MinPresValue,
    MaxPresValue,
    HighLimit,
    LowLimit,
    Resolution,
    PriorityArray,
    RelinquishDefault,
    CovIncrement,
    TimeDelay,
    TimeDelayNormal,
    NotificationClass,
    NotifyType,
    Deadband,
    LimitEnable,
    EventEnable,
    AckedTransitions,
    EventTimeStamps,
    EventMessageTexts,
    EventMessageTextsConfig,
    EventDetectionEnable,
    EventAlgorithmInhibitRef,
    EventAlgorithmInhibit,
    ReliabilityEvaluationInhibit,
}

impl Property {
    /// Numeric property identifier from the BACnet standard.
    pub fn id(self) -> u32 {
        match self {
            Property::AckedTransitions => 0,
            Property::CovIncrement => 22,
            Property::Deadband => 25,
            Property::EventEnable => 35,
            Property::EventState => 36,
            Property::HighLimit => 45,
            Property::LimitEnable => 52,
            Property::LowLimit => 59,
            Property::MaxPresValue => 65,
            Property::MinPresValue => 69,
            Property::NotificationClass => 17,
            Property::NotifyType => 72,
            Property::OutOfService => 81,
            Property::PresentValue => 85,
            Property::PriorityArray => 87,
            Property::Reliability => 103,
            Property::RelinquishDefault => 104,
            Property::Resolution => 106,
            Property::StatusFlags => 111,
            Property::TimeDelay => 113,
            Property::Units => 117,
            Property::EventTimeStamps => 130,
            Property::EventMessageTexts => 351,
            Property::EventMessageTextsConfig => 352,
            Property::EventDetectionEnable => 353,
            Property::EventAlgorithmInhibitRef => 354,
            Property::EventAlgorithmInhibit => 355,
            Property::TimeDelayNormal => 356,
            Property::ReliabilityEvaluationInhibit => 357,
        }
    }
}

/// A property value as produced by the protocol driver, before the health
/// processor turns it into storage-ready fields.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f64),
    Text(String),
    Enumerated(u32),
    Bits(Vec<bool>),
    Array(Vec<RawValue>),
    ObjectId(u16, u32),
    Opaque(Vec<u8>),
}

impl RawValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Real(v) => Some(*v),
            RawValue::Unsigned(v) => Some(*v as f64),
            RawValue::Signed(v) => Some(*v as f64),
            RawValue::Enumerated(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Unsigned(v) => i64::try_from(*v).ok(),
            RawValue::Signed(v) => Some(*v),
            RawValue::Enumerated(v) => Some(i64::from(*v)),
            RawValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => f.write_str("null"),
            RawValue::Bool(v) => write!(f, "{v}"),
            RawValue::Unsigned(v) => write!(f, "{v}"),
            RawValue::Signed(v) => write!(f, "{v}"),
            RawValue::Real(v) => write!(f, "{v}"),
            RawValue::Text(v) => f.write_str(v),
            RawValue::Enumerated(v) => write!(f, "{v}"),
            RawValue::Bits(bits) => {
                let rendered: Vec<&str> = bits.iter().map(|b| if *b { "1" } else { "0" }).collect();
                write!(f, "[{}]", rendered.join(","))
            }
            RawValue::Array(values) => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(","))
            }
            RawValue::ObjectId(object_type, instance) => write!(f, "{object_type}:{instance}"),
            RawValue::Opaque(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// One network interface through which BACnet controllers are reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Stable identifier assigned by the cloud; acts as the reader identity.
    pub id: String,
    pub ip_address: String,
    #[serde(default = "default_subnet_mask")]
    pub subnet_mask: u8,
    pub bacnet_device_id: i64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bbmd_enabled: bool,
    #[serde(default)]
    pub bbmd_server_ip: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_subnet_mask() -> u8 {
    24
}

fn default_port() -> u16 {
    47808
}

fn default_active() -> bool {
    true
}

impl ReaderConfig {
    /// Whether this reader's configured network covers `target`.
    pub fn network_contains(&self, target: Ipv4Addr) -> bool {
        let Ok(bound) = self.ip_address.parse::<Ipv4Addr>() else {
            return false;
        };
        subnet_contains(bound, self.subnet_mask, target)
    }
}

/// `bits`-wide prefix match of two IPv4 addresses.
pub fn subnet_contains(network_ip: Ipv4Addr, bits: u8, target: Ipv4Addr) -> bool {
    if bits == 0 || bits > 32 {
        return bits == 0;
    }
    let mask = u32::MAX << (32 - u32::from(bits));
    (u32::from(network_ip) & mask) == (u32::from(target) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_matching() {
        let bound: Ipv4Addr = "10.0.1.2".parse().unwrap();
        assert!(subnet_contains(bound, 24, "10.0.1.50".parse().unwrap()));
        assert!(!subnet_contains(bound, 24, "10.0.2.50".parse().unwrap()));
        assert!(subnet_contains(bound, 16, "10.0.2.50".parse().unwrap()));
        assert!(subnet_contains(bound, 0, "192.168.9.9".parse().unwrap()));
    }

    #[test]
    fn reader_config_defaults_from_wire() {
        let config: ReaderConfig = serde_json::from_str(
            r#"{"id": "reader-1", "ip_address": "10.0.1.2", "bacnet_device_id": 1201}"#,
        )
        .unwrap();
        assert_eq!(config.subnet_mask, 24);
        assert_eq!(config.port, 47808);
        assert!(config.is_active);
        assert!(!config.bbmd_enabled);
    }

    #[test]
    fn raw_value_rendering_preserves_type() {
        assert_eq!(RawValue::Real(21.5).to_string(), "21.5");
        assert_eq!(RawValue::Bool(true).to_string(), "true");
        assert_eq!(RawValue::Text("active".into()).to_string(), "active");
        assert_eq!(RawValue::Enumerated(1).to_string(), "1");
    }
}
