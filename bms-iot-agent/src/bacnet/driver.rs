//! Protocol driver seam. Everything that talks BACnet/IP on the wire lives
//! behind [`BacnetClient`]; the rest of the agent only sees typed reads,
//! writes and discovery. The production implementation delegates framing to
//! the `bacnet-rs` stack and binds one UDP endpoint per reader.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bacnet_rs::app::{Apdu, MaxApduSize, MaxSegments};
use bacnet_rs::datalink::bip::BacnetIpDataLink;
use bacnet_rs::datalink::{DataLink, DataLinkAddress};
use bacnet_rs::network::Npdu;
use bacnet_rs::object::ObjectIdentifier;
use bacnet_rs::service::{
    ConfirmedServiceChoice, IAmRequest, ReadPropertyRequest, ReadPropertyResponse,
    UnconfirmedServiceChoice, WhoIsRequest,
};
use log::{debug, info, trace, warn};
use tokio::sync::oneshot;

use super::{ObjectRef, ObjectType, Property, RawValue, ReaderConfig};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("timed out waiting for a reply from {0}")]
    Timeout(SocketAddr),
    #[error("request rejected by {0}: {1}")]
    Rejected(SocketAddr, String),
    #[error("failed to bind BACnet interface {0}: {1}")]
    Bind(String, String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed reply: {0}")]
    Protocol(String),
    #[error("driver has been shut down")]
    Closed,
}

/// A controller that answered a Who-Is sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub device_id: u32,
    pub vendor_id: u32,
    pub address: SocketAddr,
}

/// The seam between the agent and the BACnet protocol stack.
#[async_trait]
pub trait BacnetClient: Send + Sync {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
    ) -> Result<RawValue, DriverError>;

    async fn write_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
        value: &RawValue,
        priority: Option<u8>,
    ) -> Result<(), DriverError>;

    /// Broadcasts a Who-Is and collects I-Am answers for `wait`.
    async fn discover(&self, wait: Duration) -> Result<Vec<DiscoveredDevice>, DriverError>;

    async fn shutdown(&self);
}

/// Constructs connected clients for reader configurations. The pool owns one
/// of these so tests can substitute the transport.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &ReaderConfig)
        -> Result<Arc<dyn BacnetClient>, DriverError>;
}

/// Production factory: one UDP datalink per reader, bound to the reader's
/// configured endpoint.
#[derive(Debug, Default)]
pub struct UdpClientFactory;

#[async_trait]
impl ClientFactory for UdpClientFactory {
    async fn connect(
        &self,
        config: &ReaderConfig,
    ) -> Result<Arc<dyn BacnetClient>, DriverError> {
        let client = UdpClient::bind(config)?;
        Ok(client as Arc<dyn BacnetClient>)
    }
}

enum AckEvent {
    ReadAck(Vec<u8>),
    WriteAck,
    Rejected(String),
}

pub struct UdpClient {
    endpoint: String,
    datalink: Arc<Mutex<BacnetIpDataLink>>,
    pending: Arc<Mutex<HashMap<u8, oneshot::Sender<AckEvent>>>>,
    discovered: Arc<Mutex<Vec<DiscoveredDevice>>>,
    invoke_id: AtomicU8,
    stopped: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl UdpClient {
    pub fn bind(config: &ReaderConfig) -> Result<Arc<Self>, DriverError> {
        let endpoint = format!("{}:{}", config.ip_address, config.port);
        info!("Binding BACnet/IP reader {} on {endpoint}", config.id);

        let datalink = BacnetIpDataLink::new(endpoint.as_str())
            .map_err(|e| DriverError::Bind(endpoint.clone(), e.to_string()))?;

        if config.bbmd_enabled {
            // Foreign-device registration is handled by the site BBMD config;
            // the reader itself only needs its local broadcast domain.
            debug!(
                "Reader {} has BBMD relay {:?} configured",
                config.id, config.bbmd_server_ip
            );
        }

        let client = Arc::new(UdpClient {
            endpoint,
            datalink: Arc::new(Mutex::new(datalink)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            discovered: Arc::new(Mutex::new(Vec::new())),
            invoke_id: AtomicU8::new(1),
            stopped: Arc::new(AtomicBool::new(false)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        });

        client.spawn_receive_loop();
        Ok(client)
    }

    fn next_invoke_id(&self) -> u8 {
        self.invoke_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Runs the datagram pump on the blocking pool; inbound frames resolve
    /// pending requests and collect I-Am announcements.
    fn spawn_receive_loop(self: &Arc<Self>) {
        let datalink = self.datalink.clone();
        let pending = self.pending.clone();
        let discovered = self.discovered.clone();
        let stopped = self.stopped.clone();
        let endpoint = self.endpoint.clone();

        tokio::task::spawn_blocking(move || {
            while !stopped.load(Ordering::Relaxed) {
                let frame = {
                    match datalink.lock() {
                        Ok(mut dl) => dl.receive_frame().ok(),
                        Err(_) => None,
                    }
                };

                if let Some((buf, source)) = frame {
                    if !buf.is_empty() {
                        process_frame(&buf, &source, &pending, &discovered);
                    }
                }

                std::thread::sleep(RECEIVE_POLL_INTERVAL);
            }
            debug!("Receive loop for {endpoint} stopped");
        });
    }

    fn register_pending(&self, invoke_id: u8) -> Result<oneshot::Receiver<AckEvent>, DriverError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(DriverError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| DriverError::Transport("pending map poisoned".into()))?
            .insert(invoke_id, tx);
        Ok(rx)
    }

    fn forget_pending(&self, invoke_id: u8) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&invoke_id);
        }
    }

    fn send_confirmed(
        &self,
        target: SocketAddr,
        service_choice: ConfirmedServiceChoice,
        service_data: Vec<u8>,
        invoke_id: u8,
    ) -> Result<(), DriverError> {
        let apdu = Apdu::ConfirmedRequest {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: true,
            max_segments: MaxSegments::Unspecified,
            max_response_size: MaxApduSize::Up1476,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        };

        let mut npdu = Npdu::new();
        npdu.control.expecting_reply = true;
        npdu.control.priority = 0;

        let mut packet = npdu.encode();
        packet.extend_from_slice(&apdu.encode());

        let mut dl = self
            .datalink
            .lock()
            .map_err(|_| DriverError::Transport("datalink poisoned".into()))?;
        dl.send_unicast_npdu(&packet, target)
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn await_ack(
        &self,
        target: SocketAddr,
        invoke_id: u8,
        rx: oneshot::Receiver<AckEvent>,
    ) -> Result<AckEvent, DriverError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => {
                self.forget_pending(invoke_id);
                Err(DriverError::Closed)
            }
            Err(_) => {
                self.forget_pending(invoke_id);
                Err(DriverError::Timeout(target))
            }
        }
    }
}

#[async_trait]
impl BacnetClient for UdpClient {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
    ) -> Result<RawValue, DriverError> {
        let object_identifier =
            ObjectIdentifier::new(to_lib_object_type(object.object_type), object.instance);
        let request = ReadPropertyRequest::new(object_identifier, property.id().into());
        let mut service_data = Vec::new();
        request
            .encode(&mut service_data)
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        let invoke_id = self.next_invoke_id();
        let rx = self.register_pending(invoke_id)?;
        self.send_confirmed(target, ConfirmedServiceChoice::ReadProperty, service_data, invoke_id)?;
        trace!("Sent ReadProperty {object} / {property:?} to {target} (invoke {invoke_id})");

        match self.await_ack(target, invoke_id, rx).await? {
            AckEvent::ReadAck(value_bytes) => Ok(decode_property_value(&value_bytes)),
            AckEvent::WriteAck => Err(DriverError::Protocol(
                "simple ack received for a read request".into(),
            )),
            AckEvent::Rejected(reason) => Err(DriverError::Rejected(target, reason)),
        }
    }

    async fn write_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
        value: &RawValue,
        priority: Option<u8>,
    ) -> Result<(), DriverError> {
        let service_data = encode_write_property(object, property, value, priority)?;

        let invoke_id = self.next_invoke_id();
        let rx = self.register_pending(invoke_id)?;
        self.send_confirmed(
            target,
            ConfirmedServiceChoice::WriteProperty,
            service_data,
            invoke_id,
        )?;
        trace!("Sent WriteProperty {object} = {value} to {target} (invoke {invoke_id})");

        match self.await_ack(target, invoke_id, rx).await? {
            AckEvent::WriteAck => Ok(()),
            AckEvent::ReadAck(_) => Err(DriverError::Protocol(
                "complex ack received for a write request".into(),
            )),
            AckEvent::Rejected(reason) => Err(DriverError::Rejected(target, reason)),
        }
    }

    async fn discover(&self, wait: Duration) -> Result<Vec<DiscoveredDevice>, DriverError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(DriverError::Closed);
        }

        if let Ok(mut discovered) = self.discovered.lock() {
            discovered.clear();
        }

        let whois = WhoIsRequest::new();
        let mut service_data = Vec::new();
        whois
            .encode(&mut service_data)
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        let apdu = Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::WhoIs,
            service_data,
        };

        let mut npdu = Npdu::new();
        npdu.control.expecting_reply = false;
        npdu.control.priority = 0;

        let mut packet = npdu.encode();
        packet.extend_from_slice(&apdu.encode());

        {
            let mut dl = self
                .datalink
                .lock()
                .map_err(|_| DriverError::Transport("datalink poisoned".into()))?;
            dl.send_broadcast_npdu(&packet)
                .map_err(|e| DriverError::Transport(e.to_string()))?;
        }
        debug!("Broadcast Who-Is from {}", self.endpoint);

        tokio::time::sleep(wait).await;

        let discovered = self
            .discovered
            .lock()
            .map_err(|_| DriverError::Transport("discovery list poisoned".into()))?
            .clone();
        Ok(discovered)
    }

    async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

fn process_frame(
    buf: &[u8],
    source: &DataLinkAddress,
    pending: &Mutex<HashMap<u8, oneshot::Sender<AckEvent>>>,
    discovered: &Mutex<Vec<DiscoveredDevice>>,
) {
    let Ok((npdu, consumed)) = Npdu::decode(buf) else {
        return;
    };
    if npdu.is_network_message() || buf.len() <= consumed {
        return;
    }

    let Ok(apdu) = Apdu::decode(&buf[consumed..]) else {
        return;
    };

    let source_addr = match source {
        DataLinkAddress::Ip(addr) => *addr,
        _ => return,
    };

    match apdu {
        Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::IAm,
            service_data,
        } => {
            if let Ok(iam) = IAmRequest::decode(&service_data) {
                trace!(
                    "I-Am from device {} at {source_addr}",
                    iam.device_identifier.instance
                );
                if let Ok(mut discovered) = discovered.lock() {
                    discovered.push(DiscoveredDevice {
                        device_id: iam.device_identifier.instance,
                        vendor_id: u32::from(iam.vendor_identifier),
                        address: source_addr,
                    });
                }
            }
        }
        Apdu::ComplexAck {
            service_choice,
            service_data,
            invoke_id,
            ..
        } => {
            if service_choice == ConfirmedServiceChoice::ReadProperty {
                match ReadPropertyResponse::decode(&service_data) {
                    Ok(ack) => {
                        let mut value_bytes = Vec::new();
                        for property_value in &ack.property_values {
                            let _ = bacnet_rs::property::encode_property_value(
                                property_value,
                                &mut value_bytes,
                            );
                        }
                        resolve(pending, invoke_id, AckEvent::ReadAck(value_bytes))
                    }
                    Err(e) => resolve(
                        pending,
                        invoke_id,
                        AckEvent::Rejected(format!("undecodable read ack: {e:?}")),
                    ),
                }
            } else {
                resolve(
                    pending,
                    invoke_id,
                    AckEvent::Rejected(format!("unexpected ack for service {service_choice:?}")),
                );
            }
        }
        Apdu::SimpleAck { invoke_id, .. } => {
            resolve(pending, invoke_id, AckEvent::WriteAck);
        }
        Apdu::Error { invoke_id, .. } => {
            resolve(
                pending,
                invoke_id,
                AckEvent::Rejected("error reply from device".into()),
            );
        }
        _ => {}
    }
}

fn resolve(pending: &Mutex<HashMap<u8, oneshot::Sender<AckEvent>>>, invoke_id: u8, event: AckEvent) {
    let sender = match pending.lock() {
        Ok(mut pending) => pending.remove(&invoke_id),
        Err(_) => None,
    };
    match sender {
        Some(sender) => {
            let _ = sender.send(event);
        }
        None => warn!("Reply for unknown invoke id {invoke_id}"),
    }
}

fn to_lib_object_type(object_type: ObjectType) -> bacnet_rs::object::ObjectType {
    use bacnet_rs::object::ObjectType as Lib;
    match object_type {
        ObjectType::AnalogInput => Lib::AnalogInput,
        ObjectType::AnalogOutput => Lib::AnalogOutput,
        ObjectType::AnalogValue => Lib::AnalogValue,
        ObjectType::BinaryInput => Lib::BinaryInput,
        ObjectType::BinaryOutput => Lib::BinaryOutput,
        ObjectType::BinaryValue => Lib::BinaryValue,
        ObjectType::MultiStateInput => Lib::MultiStateInput,
        ObjectType::MultiStateOutput => Lib::MultiStateOutput,
        ObjectType::MultiStateValue => Lib::MultiStateValue,
        ObjectType::Device => Lib::Device,
    }
}

// ---------------------------------------------------------------------------
// Application-tag glue. The stack decodes reals for us; the remaining
// primitive tags are small enough to handle here, the same trade-off the
// bridge gateways using this stack make.
// ---------------------------------------------------------------------------

fn encode_write_property(
    object: ObjectRef,
    property: Property,
    value: &RawValue,
    priority: Option<u8>,
) -> Result<Vec<u8>, DriverError> {
    let mut data = Vec::new();

    // Context 0: object identifier
    let object_id =
        (u32::from(object.object_type.type_code()) << 22) | (object.instance & 0x003f_ffff);
    data.push(0x0c);
    data.extend_from_slice(&object_id.to_be_bytes());

    // Context 1: property identifier
    let property_id = property.id();
    if property_id <= 0xff {
        data.push(0x19);
        data.push(property_id as u8);
    } else {
        data.push(0x1a);
        data.extend_from_slice(&(property_id as u16).to_be_bytes());
    }

    // Context 3: property value (opening / application value / closing)
    data.push(0x3e);
    data.extend_from_slice(&encode_application_value(value)?);
    data.push(0x3f);

    // Context 4: priority
    if let Some(priority) = priority {
        data.push(0x49);
        data.push(priority);
    }

    Ok(data)
}

fn encode_application_value(value: &RawValue) -> Result<Vec<u8>, DriverError> {
    let mut out = Vec::new();
    match value {
        RawValue::Null => out.push(0x00),
        RawValue::Bool(v) => out.push(0x10 | u8::from(*v)),
        RawValue::Unsigned(v) => {
            let bytes = minimal_be_bytes(*v);
            out.push(0x20 | bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        RawValue::Signed(v) => {
            let bytes = minimal_be_bytes_signed(*v);
            out.push(0x30 | bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        RawValue::Real(v) => {
            out.push(0x44);
            out.extend_from_slice(&(*v as f32).to_be_bytes());
        }
        RawValue::Enumerated(v) => {
            let bytes = minimal_be_bytes(u64::from(*v));
            out.push(0x90 | bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        RawValue::Text(text) => {
            let payload_len = text.len() + 1;
            if payload_len < 5 {
                out.push(0x70 | payload_len as u8);
            } else if payload_len <= 253 {
                out.push(0x75);
                out.push(payload_len as u8);
            } else {
                return Err(DriverError::Protocol("string value too long".into()));
            }
            out.push(0x00); // UTF-8
            out.extend_from_slice(text.as_bytes());
        }
        other => {
            return Err(DriverError::Protocol(format!(
                "cannot encode {other} as a write value"
            )))
        }
    }
    Ok(out)
}

fn minimal_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

fn minimal_be_bytes_signed(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut skip = 0;
    while skip < 7 {
        let fill = if value < 0 { 0xff } else { 0x00 };
        if bytes[skip] == fill && (bytes[skip + 1] & 0x80) == (fill & 0x80) {
            skip += 1;
        } else {
            break;
        }
    }
    bytes[skip..].to_vec()
}

/// Decodes an application-tagged property value. Array-valued properties
/// (priority-array, event-time-stamps) arrive as consecutive tagged values
/// and come back as [`RawValue::Array`].
pub(crate) fn decode_property_value(data: &[u8]) -> RawValue {
    let mut values = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match decode_tagged_value(data, offset) {
            Some((value, next)) if next > offset => {
                values.push(value);
                offset = next;
            }
            _ => {
                // Unparseable tail; keep it opaque instead of dropping data.
                values.push(RawValue::Opaque(data[offset..].to_vec()));
                break;
            }
        }
    }

    match values.len() {
        0 => RawValue::Null,
        1 => values.remove(0),
        _ => RawValue::Array(values),
    }
}

fn decode_tagged_value(data: &[u8], offset: usize) -> Option<(RawValue, usize)> {
    let tag_byte = *data.get(offset)?;
    let tag_number = tag_byte >> 4;
    let is_context = tag_byte & 0x08 != 0;
    let lvt = tag_byte & 0x07;

    if is_context {
        // Opening tags wrap constructed values; skip to the matching close
        // and keep the raw bytes.
        if lvt == 6 {
            let mut depth = 1;
            let mut cursor = offset + 1;
            let start = cursor;
            while cursor < data.len() && depth > 0 {
                let b = data[cursor];
                if b & 0x08 != 0 && b & 0x07 == 6 {
                    depth += 1;
                    cursor += 1;
                } else if b & 0x08 != 0 && b & 0x07 == 7 {
                    depth -= 1;
                    cursor += 1;
                } else {
                    let (_, next) = decode_tagged_value(data, cursor)?;
                    cursor = next;
                }
            }
            return Some((RawValue::Opaque(data[start..cursor].to_vec()), cursor));
        }
        // Primitive context tag: content length is the lvt.
        let len = resolve_length(data, offset, lvt)?;
        let (content_start, content_end) = len;
        return Some((
            RawValue::Opaque(data[content_start..content_end].to_vec()),
            content_end,
        ));
    }

    if tag_number == 4 {
        // Let the protocol stack decode reals.
        return match bacnet_rs::encoding::decode_real(&data[offset..]) {
            Ok((value, consumed)) => Some((RawValue::Real(f64::from(value)), offset + consumed)),
            Err(_) => None,
        };
    }

    if tag_number == 1 {
        return Some((RawValue::Bool(lvt != 0), offset + 1));
    }

    let (content_start, content_end) = resolve_length(data, offset, lvt)?;
    let content = &data[content_start..content_end];

    let value = match tag_number {
        0 => RawValue::Null,
        2 => RawValue::Unsigned(be_u64(content)?),
        3 => RawValue::Signed(be_i64(content)?),
        5 => {
            let bytes: [u8; 8] = content.try_into().ok()?;
            RawValue::Real(f64::from_be_bytes(bytes))
        }
        7 => {
            let (_charset, text) = content.split_first()?;
            RawValue::Text(String::from_utf8_lossy(text).into_owned())
        }
        8 => {
            let (unused, bits_bytes) = content.split_first()?;
            let total_bits = bits_bytes.len() * 8;
            let used_bits = total_bits.saturating_sub(usize::from(*unused));
            let bits = (0..used_bits)
                .map(|i| bits_bytes[i / 8] & (0x80 >> (i % 8)) != 0)
                .collect();
            RawValue::Bits(bits)
        }
        9 => RawValue::Enumerated(u32::try_from(be_u64(content)?).ok()?),
        10 => {
            // Date: year offset from 1900, month, day, day-of-week
            let [year, month, day, _dow]: [u8; 4] = content.try_into().ok()?;
            RawValue::Text(format!(
                "{:04}-{:02}-{:02}",
                1900 + u32::from(year),
                month,
                day
            ))
        }
        11 => {
            let [hour, minute, second, _hundredths]: [u8; 4] = content.try_into().ok()?;
            RawValue::Text(format!("{hour:02}:{minute:02}:{second:02}"))
        }
        12 => {
            let raw = u32::from_be_bytes(content.try_into().ok()?);
            RawValue::ObjectId((raw >> 22) as u16, raw & 0x003f_ffff)
        }
        _ => RawValue::Opaque(content.to_vec()),
    };

    Some((value, content_end))
}

/// Returns the (start, end) byte range of a tag's content, handling the
/// extended one-byte length form.
fn resolve_length(data: &[u8], offset: usize, lvt: u8) -> Option<(usize, usize)> {
    if lvt < 5 {
        let start = offset + 1;
        let end = start + usize::from(lvt);
        (end <= data.len()).then_some((start, end))
    } else if lvt == 5 {
        let len = usize::from(*data.get(offset + 1)?);
        let start = offset + 2;
        let end = start + len;
        (end <= data.len()).then_some((start, end))
    } else {
        None
    }
}

fn be_u64(content: &[u8]) -> Option<u64> {
    if content.is_empty() || content.len() > 8 {
        return None;
    }
    let mut value: u64 = 0;
    for byte in content {
        value = (value << 8) | u64::from(*byte);
    }
    Some(value)
}

fn be_i64(content: &[u8]) -> Option<i64> {
    if content.is_empty() || content.len() > 8 {
        return None;
    }
    let negative = content[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for byte in content {
        value = (value << 8) | i64::from(*byte);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_primitive_application_tags() {
        // Unsigned 42
        assert_eq!(decode_property_value(&[0x21, 42]), RawValue::Unsigned(42));
        // Boolean true
        assert_eq!(decode_property_value(&[0x11]), RawValue::Bool(true));
        // Enumerated 1
        assert_eq!(decode_property_value(&[0x91, 1]), RawValue::Enumerated(1));
        // Null
        assert_eq!(decode_property_value(&[0x00]), RawValue::Null);
    }

    #[test]
    fn decodes_character_string() {
        let mut data = vec![0x75, 0x06, 0x00];
        data.extend_from_slice(b"hello");
        assert_eq!(
            decode_property_value(&data),
            RawValue::Text("hello".to_string())
        );
    }

    #[test]
    fn decodes_bit_string() {
        // 4 status-flag bits, 4 unused: fault + out-of-service = 0101____
        let data = [0x82, 0x04, 0b0101_0000];
        assert_eq!(
            decode_property_value(&data),
            RawValue::Bits(vec![false, true, false, true])
        );
    }

    #[test]
    fn decodes_consecutive_values_as_array() {
        // Two unsigned values back to back
        let data = [0x21, 1, 0x21, 2];
        assert_eq!(
            decode_property_value(&data),
            RawValue::Array(vec![RawValue::Unsigned(1), RawValue::Unsigned(2)])
        );
    }

    #[test]
    fn decodes_object_identifier() {
        // analog-input instance 5: (0 << 22) | 5
        let data = [0xc4, 0x00, 0x00, 0x00, 0x05];
        assert_eq!(decode_property_value(&data), RawValue::ObjectId(0, 5));
    }

    #[test]
    fn write_encoding_places_priority_last() {
        let data = encode_write_property(
            ObjectRef {
                object_type: ObjectType::AnalogValue,
                instance: 7,
            },
            Property::PresentValue,
            &RawValue::Real(21.5),
            Some(8),
        )
        .unwrap();

        // context 0 object id
        assert_eq!(data[0], 0x0c);
        let object_id = u32::from_be_bytes(data[1..5].try_into().unwrap());
        assert_eq!(object_id >> 22, u32::from(ObjectType::AnalogValue.type_code()));
        assert_eq!(object_id & 0x003f_ffff, 7);
        // trailing context 4 priority
        assert_eq!(&data[data.len() - 2..], &[0x49, 8]);
    }

    #[test]
    fn signed_minimal_encoding() {
        assert_eq!(minimal_be_bytes(0), vec![0]);
        assert_eq!(minimal_be_bytes(0x1234), vec![0x12, 0x34]);
        assert_eq!(minimal_be_bytes_signed(-1), vec![0xff]);
        assert_eq!(minimal_be_bytes_signed(127), vec![0x7f]);
        assert_eq!(minimal_be_bytes_signed(128), vec![0x00, 0x80]);
    }
}
