//! Caller-side access to remote services for processes that host no
//! handlers of their own.

use {
    crate::{
        amqp::AmqpDriver,
        discovery::{Discovery, LocalDiscovery},
        error::Error,
        postprocessor::{PostProcessor, PublishCommand},
        proxy::Proxy,
        ConnectionConfig,
    },
    courier_rpc::{
        domain::CorrelationId, entry_point::Source, envelope::Context, error::RpcError,
    },
    std::{collections::HashMap, sync::Arc},
    tokio::sync::mpsc::{self, UnboundedReceiver},
};

/// A client bound to one source address and a discovery table. Proxies built
/// from it queue publish commands; [`RpcClient::flush`] ships the queue over
/// an ephemeral publisher connection.
#[derive(Debug)]
pub struct RpcClient {
    config: ConnectionConfig,
    source: Source,
    headers: HashMap<String, String>,
    postprocessor: PostProcessor,
    publish_rx: UnboundedReceiver<PublishCommand>,
}

impl RpcClient {
    pub fn new(config: ConnectionConfig, source: Source, discovery: Arc<dyn Discovery>) -> Self {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();

        Self {
            config,
            source,
            headers: HashMap::new(),
            postprocessor: PostProcessor::new(discovery, publish_tx),
            publish_rx,
        }
    }

    /// Convenience constructor for talking to a single service over a known
    /// exchange, without a full discovery table.
    pub fn with_exchange(
        config: ConnectionConfig,
        source: Source,
        service: &str,
        exchange: &str,
    ) -> Self {
        let mut discovery = LocalDiscovery::new();
        discovery.register_remote_service(service, exchange);
        Self::new(config, source, Arc::new(discovery))
    }

    /// Binds headers applied to every call made through this client's
    /// proxies. Reserved headers are rejected.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Result<Self, RpcError> {
        // The proxy repeats this check; failing here keeps the error at
        // construction time.
        crate::proxy::check_headers(&headers)?;
        self.headers = headers;
        Ok(self)
    }

    /// A proxy opening a fresh causality chain.
    pub fn proxy(&self) -> Result<Proxy<'_>, RpcError> {
        Proxy::new(
            &self.postprocessor,
            self.source.clone(),
            Context::default(),
            CorrelationId::generate(),
            HashMap::new(),
        )
        .with_headers(self.headers.clone())
    }

    /// A proxy continuing the given causality chain.
    pub fn proxy_with_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Proxy<'_>, RpcError> {
        Proxy::new(
            &self.postprocessor,
            self.source.clone(),
            Context::default(),
            correlation_id,
            HashMap::new(),
        )
        .with_headers(self.headers.clone())
    }

    /// Publishes everything queued by this client's proxies over an
    /// ephemeral connection, then closes it.
    pub async fn flush(&mut self) -> Result<(), Error> {
        let mut commands = Vec::new();
        while let Ok(command) = self.publish_rx.try_recv() {
            commands.push(command);
        }

        if commands.is_empty() {
            return Ok(());
        }

        AmqpDriver::new(self.config.clone()).publish_once(commands).await
    }

    /// Number of queued, unflushed publish commands.
    pub fn pending(&self) -> usize {
        self.publish_rx.len()
    }
}
