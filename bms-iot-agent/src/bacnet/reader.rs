//! A reader couples one connected protocol client with its configuration and
//! an in-flight operation counter used by the load balancer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::driver::{BacnetClient, DiscoveredDevice, DriverError};
use super::{ObjectRef, Property, RawValue, ReaderConfig};

pub struct Reader {
    config: ReaderConfig,
    client: Arc<dyn BacnetClient>,
    active_operations: AtomicUsize,
}

/// Keeps the in-flight counter accurate on every exit path, including
/// timeouts and panics.
struct OperationGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> OperationGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        OperationGuard { counter }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Reader {
    pub fn new(config: ReaderConfig, client: Arc<dyn BacnetClient>) -> Self {
        Reader {
            config,
            client,
            active_operations: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// (bound_ip, udp_port) endpoint identity of this reader.
    pub fn endpoint(&self) -> (String, u16) {
        (self.config.ip_address.clone(), self.config.port)
    }

    pub fn active_operations(&self) -> usize {
        self.active_operations.load(Ordering::SeqCst)
    }

    pub async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
    ) -> Result<RawValue, DriverError> {
        let _guard = OperationGuard::new(&self.active_operations);
        self.client.read_property(target, object, property).await
    }

    pub async fn write_property(
        &self,
        target: SocketAddr,
        object: ObjectRef,
        property: Property,
        value: &RawValue,
        priority: Option<u8>,
    ) -> Result<(), DriverError> {
        let _guard = OperationGuard::new(&self.active_operations);
        self.client
            .write_property(target, object, property, value, priority)
            .await
    }

    pub async fn discover(&self, wait: Duration) -> Result<Vec<DiscoveredDevice>, DriverError> {
        let _guard = OperationGuard::new(&self.active_operations);
        self.client.discover(wait).await
    }

    pub async fn disconnect(&self) {
        self.client.shutdown().await;
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.config.id)
            .field("endpoint", &format!("{}:{}", self.config.ip_address, self.config.port))
            .field("active_operations", &self.active_operations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct BlockingClient {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl BacnetClient for BlockingClient {
        async fn read_property(
            &self,
            _target: SocketAddr,
            _object: ObjectRef,
            _property: Property,
        ) -> Result<RawValue, DriverError> {
            self.release.notified().await;
            Ok(RawValue::Null)
        }

        async fn write_property(
            &self,
            _target: SocketAddr,
            _object: ObjectRef,
            _property: Property,
            _value: &RawValue,
            _priority: Option<u8>,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn discover(
            &self,
            _wait: Duration,
        ) -> Result<Vec<DiscoveredDevice>, DriverError> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) {}
    }

    fn test_config() -> ReaderConfig {
        ReaderConfig {
            id: "reader-1".to_string(),
            ip_address: "10.0.1.2".to_string(),
            subnet_mask: 24,
            bacnet_device_id: 1201,
            port: 47808,
            bbmd_enabled: false,
            bbmd_server_ip: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn counter_tracks_in_flight_operations() {
        let client = Arc::new(BlockingClient {
            release: tokio::sync::Notify::new(),
        });
        let reader = Arc::new(Reader::new(test_config(), client.clone()));

        let target: SocketAddr = "10.0.1.50:47808".parse().unwrap();
        let object = ObjectRef {
            object_type: crate::bacnet::ObjectType::AnalogInput,
            instance: 1,
        };

        let in_flight = {
            let reader = reader.clone();
            tokio::spawn(async move {
                reader
                    .read_property(target, object, Property::PresentValue)
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert_eq!(reader.active_operations(), 1);

        client.release.notify_one();
        in_flight.await.unwrap().unwrap();
        assert_eq!(reader.active_operations(), 0);
    }
}
