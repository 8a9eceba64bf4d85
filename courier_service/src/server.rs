//! The server: hosts registered controllers, declares the broker topology
//! they imply, and drives the consume loop over one broker connection.

use {
    crate::{
        amqp::{AmqpDriver, Command},
        discovery::Discovery,
        error::Error,
        postprocessor::{PostProcessor, PublishCommand},
        preprocessor::PreProcessor,
        router::Router,
        service::{Controller, ServiceController, ServiceHost},
        ConnectionConfig,
    },
    courier_rpc::domain::ExchangeName,
    std::sync::Arc,
    tokio::sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    tracing::info,
};

/// One queue binding of the topology plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: ExchangeName,
    pub routing_key: String,
}

/// The broker structures a server declares before consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub exchanges: Vec<ExchangeName>,
    pub queue: String,
    pub bindings: Vec<Binding>,
}

/// Hosts service controllers over a single broker connection.
pub struct Server {
    config: ConnectionConfig,
    queue_name: String,
    exchange_name: ExchangeName,
    router: Router,
    hosts: Vec<Box<dyn Controller>>,
    publish_tx: UnboundedSender<PublishCommand>,
    publish_rx: UnboundedReceiver<PublishCommand>,
    command_tx: UnboundedSender<Command>,
    command_rx: UnboundedReceiver<Command>,
}

impl Server {
    pub fn new(
        config: ConnectionConfig,
        queue_name: impl Into<String>,
        exchange_name: impl Into<ExchangeName>,
    ) -> Self {
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            config,
            queue_name: queue_name.into(),
            exchange_name: exchange_name.into(),
            router: Router::new(),
            hosts: Vec::new(),
            publish_tx,
            publish_rx,
            command_tx,
            command_rx,
        }
    }

    /// Builds a host for `service` with a postprocessor bound to this
    /// server's publish queue, for callers that want to attach middlewares
    /// before [`Server::add_host`].
    pub fn new_host<S: ServiceController>(
        &self,
        service: S,
        discovery: Arc<dyn Discovery>,
    ) -> Result<ServiceHost<S>, Error> {
        let postprocessor = PostProcessor::new(discovery.clone(), self.publish_tx.clone());
        Ok(ServiceHost::new(service, discovery, postprocessor)?)
    }

    /// Registers a built host: binds its service names into the router
    /// tables and takes ownership.
    pub fn add_host<S: ServiceController>(&mut self, host: ServiceHost<S>) {
        for name in host.rpc_bindings() {
            self.router.register(name.clone(), host.id());
        }
        for name in host.subscription_bindings() {
            self.router.register_subscription(name.clone(), host.id());
        }

        self.hosts.push(Box::new(host));
    }

    /// Builds and registers a host in one step.
    pub fn add_service<S: ServiceController>(
        &mut self,
        service: S,
        discovery: Arc<dyn Discovery>,
    ) -> Result<(), Error> {
        let host = self.new_host(service, discovery)?;
        self.add_host(host);
        Ok(())
    }

    /// A clonable handle for stopping the server from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The broker structures implied by the registered controllers: the
    /// server's own exchange and queue, a `service.#` binding per request
    /// service, a publisher binding per subscription, and every exchange the
    /// discovery tables reference.
    pub fn topology_plan(&self) -> Result<TopologyPlan, Error> {
        let mut exchanges = vec![self.exchange_name.clone()];
        let mut bindings = Vec::new();

        for host in &self.hosts {
            exchanges.extend(host.discovery().all_exchanges());

            let dispatcher = host.dispatcher();
            for service in dispatcher.request_services() {
                bindings.push(Binding {
                    exchange: self.exchange_name.clone(),
                    routing_key: format!("{service}.#"),
                });
            }

            for publisher in dispatcher.publishers() {
                let service = publisher
                    .service()
                    .ok_or(courier_rpc::error::RpcError::WrongEntryPointFormat)?;
                let exchange = host.discovery().remote_publisher(service)?;
                bindings.push(Binding {
                    exchange,
                    routing_key: publisher.to_routing_key()?.to_string(),
                });
            }
        }

        exchanges.sort_unstable_by(|a, b| a.as_ref().cmp(b.as_ref()));
        exchanges.dedup();
        bindings.dedup();

        Ok(TopologyPlan {
            exchanges,
            queue: self.queue_name.clone(),
            bindings,
        })
    }

    /// Declares the topology and consumes until stopped. Instantiation and
    /// registration must be complete: the routing tables freeze here.
    pub async fn run(self) -> Result<(), Error> {
        let plan = self.topology_plan()?;

        let Server {
            config,
            queue_name,
            router,
            hosts,
            publish_rx,
            command_tx,
            command_rx,
            ..
        } = self;

        // Keep the control side open even when no handle was taken.
        let _command_tx = command_tx;

        let mut driver = AmqpDriver::new(config.clone());
        info!("declaring AMQP structures");
        driver.declare_topology(&plan).await?;

        info!(host = %config.host, port = config.port, queue = %queue_name, "server is listening");
        let preprocessor = PreProcessor::new(router, hosts);
        driver
            .run(&queue_name, preprocessor, publish_rx, command_rx)
            .await
    }
}

/// Runs a server on the engine its configuration selects, owning the
/// runtime: the event loop runs on a multi-thread runtime when
/// `async_engine` is set, and through the serial blocking facade otherwise.
/// Callers already inside a runtime use [`Server::run`] directly.
pub fn serve(server: Server) -> Result<(), Error> {
    if server.config().async_engine {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(server.run())
    } else {
        crate::blocking::Server::new(server)?.run()
    }
}

/// Stops a running server: sets the draining state, lets the in-flight
/// handler finish, flushes queued publishes and closes the connection.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    command_tx: UnboundedSender<Command>,
}

impl ServerHandle {
    pub async fn stop(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();

        self.command_tx
            .send(Command::Stop { tx })
            .map_err(|_| Error::ChannelClosed)?;

        rx.await.map_err(|_| Error::ChannelClosed)
    }
}
