//! The reader pool: owns every connected reader, enforces endpoint
//! uniqueness and answers selection queries for the monitoring and writer
//! actors.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::{error, info, warn};

use super::balancer::{LoadBalancer, Strategy};
use super::driver::ClientFactory;
use super::reader::Reader;
use super::ReaderConfig;

pub const MAX_CONCURRENT_PER_READER: usize = 5;

/// Per-reader utilization snapshot for logs and tests.
#[derive(Debug, Clone)]
pub struct ReaderUtilization {
    pub reader_id: String,
    pub endpoint: (String, u16),
    pub active_operations: usize,
}

pub struct ReaderPool {
    factory: Arc<dyn ClientFactory>,
    readers: RwLock<Vec<Arc<Reader>>>,
    default_reader: RwLock<Option<Arc<Reader>>>,
    balancer: LoadBalancer,
    initialized: AtomicBool,
}

impl ReaderPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        ReaderPool {
            factory,
            readers: RwLock::new(Vec::new()),
            default_reader: RwLock::new(None),
            balancer: LoadBalancer::new(Strategy::RoundRobin),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_strategy(factory: Arc<dyn ClientFactory>, strategy: Strategy) -> Self {
        ReaderPool {
            factory,
            readers: RwLock::new(Vec::new()),
            default_reader: RwLock::new(None),
            balancer: LoadBalancer::new(strategy),
            initialized: AtomicBool::new(false),
        }
    }

    /// Connects every active, non-conflicting reader configuration. Existing
    /// readers are always torn down first; the first successful connection
    /// becomes the default reader. Returns the ids that came up.
    pub async fn initialize(&self, configs: &[ReaderConfig]) -> Vec<String> {
        info!("Initializing {} BACnet readers", configs.len());
        self.cleanup().await;

        let mut used_endpoints: HashSet<(String, u16)> = HashSet::new();
        let mut connected = Vec::new();

        for config in configs {
            if !config.is_active {
                info!("Skipping inactive reader {}", config.id);
                continue;
            }

            let endpoint = (config.ip_address.clone(), config.port);
            if !used_endpoints.insert(endpoint.clone()) {
                warn!(
                    "Endpoint conflict: reader {} wants {}:{} which is already taken, skipping",
                    config.id, endpoint.0, endpoint.1
                );
                continue;
            }

            match self.factory.connect(config).await {
                Ok(client) => {
                    let reader = Arc::new(Reader::new(config.clone(), client));
                    {
                        let mut readers = self.readers.write().expect("pool lock poisoned");
                        readers.push(reader.clone());
                    }
                    {
                        let mut default = self.default_reader.write().expect("pool lock poisoned");
                        if default.is_none() {
                            info!("Reader {} set as default", config.id);
                            *default = Some(reader.clone());
                        }
                    }
                    connected.push(config.id.clone());
                    info!("Reader {} connected", config.id);
                }
                Err(e) => {
                    // A reader that fails to come up releases its endpoint
                    // claim so a later duplicate config can still try.
                    used_endpoints.remove(&endpoint);
                    error!("Failed to initialize reader {}: {e}", config.id);
                }
            }
        }

        let active_total = configs.iter().filter(|c| c.is_active).count();
        info!(
            "Initialized {} out of {} active readers",
            connected.len(),
            active_total
        );
        self.initialized.store(true, Ordering::SeqCst);
        connected
    }

    /// Disconnects everything and resets selection state.
    pub async fn cleanup(&self) {
        let readers: Vec<Arc<Reader>> = {
            let mut readers = self.readers.write().expect("pool lock poisoned");
            std::mem::take(&mut *readers)
        };
        {
            let mut default = self.default_reader.write().expect("pool lock poisoned");
            *default = None;
        }

        for reader in &readers {
            reader.disconnect().await;
            info!("Reader {} disconnected", reader.id());
        }

        self.balancer.reset();
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// A lock-free snapshot of the current readers; the underlying readers
    /// are reference-stable once constructed.
    pub fn snapshot(&self) -> Vec<Arc<Reader>> {
        self.readers.read().expect("pool lock poisoned").clone()
    }

    pub fn default_reader(&self) -> Option<Arc<Reader>> {
        self.default_reader
            .read()
            .expect("pool lock poisoned")
            .clone()
    }

    /// Best reader for the next operation under the configured strategy.
    pub fn select_for_operation(&self) -> Option<Arc<Reader>> {
        let snapshot = self.snapshot();
        self.balancer.select(&snapshot)
    }

    /// Prefers a reader whose configured network covers `controller_ip`;
    /// falls back to the default reader, then to the first reader.
    pub fn select_by_subnet(&self, controller_ip: Ipv4Addr) -> Option<Arc<Reader>> {
        let snapshot = self.snapshot();

        for reader in &snapshot {
            if reader.config().network_contains(controller_ip) {
                info!(
                    "Reader {} covers controller {controller_ip}",
                    reader.id()
                );
                return Some(reader.clone());
            }
        }

        if let Some(default) = self.default_reader() {
            info!(
                "No subnet match for {controller_ip}, using default reader {}",
                default.id()
            );
            return Some(default);
        }

        snapshot.first().cloned()
    }

    /// Readers below the concurrent-operation ceiling.
    pub fn available(&self, max_concurrent: usize) -> Vec<Arc<Reader>> {
        LoadBalancer::available(&self.snapshot(), max_concurrent)
    }

    pub fn utilization(&self) -> Vec<ReaderUtilization> {
        self.snapshot()
            .iter()
            .map(|reader| ReaderUtilization {
                reader_id: reader.id().to_string(),
                endpoint: reader.endpoint(),
                active_operations: reader.active_operations(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ReaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderPool")
            .field("readers", &self.snapshot().len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
