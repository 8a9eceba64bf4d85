//! Discovery maps service names to broker exchanges for three independent
//! scopes: remote RPC targets, remote publishers this process subscribes to,
//! and local publishers (this process's own notification exchanges).

use {
    crate::error::Error,
    courier_rpc::{
        domain::{ExchangeName, ServiceName},
        error::RpcError,
    },
    serde::Deserialize,
    std::{collections::HashMap, path::Path},
};

/// Service-name → exchange-name lookup. Read-only after registration.
pub trait Discovery: Send + Sync {
    /// Exchange for sending RPC messages to `service`.
    fn remote(&self, service: &ServiceName) -> Result<ExchangeName, RpcError>;

    /// Exchange a remote `service` publishes its notifications on.
    fn remote_publisher(&self, service: &ServiceName) -> Result<ExchangeName, RpcError>;

    /// Exchange this process publishes its own notifications on, for the
    /// local `service`.
    fn local_publisher(&self, service: &ServiceName) -> Result<ExchangeName, RpcError>;

    /// Every exchange referenced by the three tables, for topology
    /// declaration.
    fn all_exchanges(&self) -> Vec<ExchangeName>;
}

/// In-process discovery backed by three hash maps.
#[derive(Debug, Clone, Default)]
pub struct LocalDiscovery {
    remote: HashMap<ServiceName, ExchangeName>,
    remote_publishers: HashMap<ServiceName, ExchangeName>,
    local_publishers: HashMap<ServiceName, ExchangeName>,
}

impl LocalDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_remote_service(
        &mut self,
        service: impl Into<ServiceName>,
        exchange: impl Into<ExchangeName>,
    ) {
        self.remote.insert(service.into(), exchange.into());
    }

    pub fn register_remote_publisher(
        &mut self,
        service: impl Into<ServiceName>,
        exchange: impl Into<ExchangeName>,
    ) {
        self.remote_publishers.insert(service.into(), exchange.into());
    }

    pub fn register_local_publisher(
        &mut self,
        service: impl Into<ServiceName>,
        exchange: impl Into<ExchangeName>,
    ) {
        self.local_publishers.insert(service.into(), exchange.into());
    }

    pub fn unregister_remote_service(&mut self, service: &ServiceName) {
        self.remote.remove(service);
    }

    pub fn unregister_remote_publisher(&mut self, service: &ServiceName) {
        self.remote_publishers.remove(service);
    }

    pub fn unregister_local_publisher(&mut self, service: &ServiceName) {
        self.local_publishers.remove(service);
    }

    fn lookup(
        table: &HashMap<ServiceName, ExchangeName>,
        service: &ServiceName,
    ) -> Result<ExchangeName, RpcError> {
        table
            .get(service)
            .cloned()
            .ok_or_else(|| RpcError::UnableToDiscover {
                service: service.to_string(),
            })
    }
}

impl Discovery for LocalDiscovery {
    fn remote(&self, service: &ServiceName) -> Result<ExchangeName, RpcError> {
        Self::lookup(&self.remote, service)
    }

    fn remote_publisher(&self, service: &ServiceName) -> Result<ExchangeName, RpcError> {
        Self::lookup(&self.remote_publishers, service)
    }

    fn local_publisher(&self, service: &ServiceName) -> Result<ExchangeName, RpcError> {
        Self::lookup(&self.local_publishers, service)
    }

    fn all_exchanges(&self) -> Vec<ExchangeName> {
        let mut exchanges: Vec<ExchangeName> = self
            .remote
            .values()
            .chain(self.remote_publishers.values())
            .chain(self.local_publishers.values())
            .cloned()
            .collect();

        exchanges.sort_unstable_by(|a, b| a.as_ref().cmp(b.as_ref()));
        exchanges.dedup();
        exchanges
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryFileEntry {
    exchange: String,
    notifications: Option<String>,
}

/// Loads a [`LocalDiscovery`] from an INI-like discovery file: one section
/// per remote service, with an `exchange` key (required) and a
/// `notifications` key (optional).
///
/// ```ini
/// [hello]
/// exchange = hello_rpc
/// notifications = hello_events
/// ```
pub fn load_discovery_file(path: &Path) -> Result<LocalDiscovery, Error> {
    let path = path.to_str().ok_or(RpcError::ConfigFileIsNotDefined)?;

    let entries: HashMap<String, DiscoveryFileEntry> = config::Config::builder()
        .add_source(config::File::new(path, config::FileFormat::Ini))
        .build()?
        .try_deserialize()?;

    let mut discovery = LocalDiscovery::new();
    for (service, entry) in entries {
        discovery.register_remote_service(service.as_str(), entry.exchange.as_str());
        if let Some(notifications) = entry.notifications {
            discovery.register_remote_publisher(service.as_str(), notifications.as_str());
        }
    }

    Ok(discovery)
}
