//! Outbound pipeline: build the broker frame from an envelope, validate it,
//! log it, and enqueue it for the adapter to publish.

use {
    crate::{discovery::Discovery, error::Error, middleware::Middleware},
    courier_rpc::{
        codec::{self, RawFrame},
        domain::{ExchangeName, RoutingKey},
        entry_point::EntryPoint,
        envelope::{MessageType, OutgoingMessage},
        error::RpcError,
    },
    std::sync::Arc,
    tokio::sync::mpsc::UnboundedSender,
    tracing::debug,
};

/// A publish instruction handed to the broker adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCommand {
    pub exchange: ExchangeName,
    pub routing_key: RoutingKey,
    pub frame: RawFrame,
}

/// Turns outgoing envelopes into publish commands on the adapter queue.
///
/// The queue is the single write path to the broker channel: handlers and
/// proxies never touch the channel directly, they enqueue here and the
/// adapter flushes before acknowledging the delivery that produced them.
pub struct PostProcessor {
    discovery: Arc<dyn Discovery>,
    publish_tx: UnboundedSender<PublishCommand>,
    middlewares: Vec<Box<dyn Middleware>>,
}

impl std::fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessor")
            .field("publish_tx", &self.publish_tx)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

impl PostProcessor {
    pub fn new(discovery: Arc<dyn Discovery>, publish_tx: UnboundedSender<PublishCommand>) -> Self {
        Self {
            discovery,
            publish_tx,
            middlewares: Vec::new(),
        }
    }

    /// Prepends a middleware to the outgoing chain.
    pub fn add_middleware(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.insert(0, middleware);
    }

    pub fn discovery(&self) -> &dyn Discovery {
        self.discovery.as_ref()
    }

    /// Runs the pipeline for one outgoing envelope.
    pub fn process(&self, mut message: OutgoingMessage) -> Result<(), Error> {
        for middleware in &self.middlewares {
            middleware.on_outgoing(&mut message)?;
        }

        let frame = codec::encode(&message)?;
        codec::validate_headers(&frame.headers)?;

        let (exchange, routing_key) = self.route(&message)?;
        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            message_type = %message.message_type(),
            "publishing message"
        );

        self.publish_tx
            .send(PublishCommand {
                exchange,
                routing_key,
                frame,
            })
            .map_err(|_| Error::ChannelClosed)
    }

    /// Resolves the target exchange and routing key for an envelope.
    /// Notifications publish on the source's local publisher exchange; every
    /// other kind goes to the destination service's RPC exchange.
    fn route(&self, message: &OutgoingMessage) -> Result<(ExchangeName, RoutingKey), RpcError> {
        let (entry_point, exchange) = match message.message_type() {
            MessageType::Notification => {
                let source = &message.headers().source.0;
                let service = require_service(source)?;
                (source, self.discovery.local_publisher(service)?)
            }

            _ => {
                let destination = &message.headers().destination.0;
                let service = require_service(destination)?;
                (destination, self.discovery.remote(service)?)
            }
        };

        Ok((exchange, entry_point.to_routing_key()?))
    }
}

fn require_service(
    entry_point: &EntryPoint,
) -> Result<&courier_rpc::domain::ServiceName, RpcError> {
    entry_point
        .service()
        .ok_or(RpcError::WrongEntryPointFormat)
}
