//! Broker adapter: connection/channel lifecycle, topology declaration,
//! publishing and the consume loop, all over lapin.

use {
    crate::{
        error::Error,
        postprocessor::PublishCommand,
        preprocessor::PreProcessor,
        server::TopologyPlan,
        ConnectionConfig,
    },
    courier_rpc::{codec::RawFrame, error::RpcError},
    lapin::{
        message::Delivery,
        options::{BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
        types::{AMQPValue, FieldTable, ShortString},
        BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    },
    std::{collections::HashMap, time::Duration},
    tokio::sync::{mpsc::UnboundedReceiver, oneshot},
    tracing::warn,
};

pub(crate) mod consume;

const CLOSE_REPLY_SUCCESS: u16 = 200;

/// Connection lifecycle states of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Draining,
    Closed,
}

/// Control commands accepted by the consume loop.
#[derive(Debug)]
pub(crate) enum Command {
    Stop { tx: oneshot::Sender<()> },
}

/// Owns the broker connection lifecycle and the retry policy. No other
/// component writes to the channel directly.
pub struct AmqpDriver {
    config: ConnectionConfig,
    state: ConnectionState,
    attempt: u32,
}

impl AmqpDriver {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Heartbeats are driven by the connection's own reactor on the
    /// event-loop adapter; this hook exists for parity with the blocking
    /// facade.
    pub fn send_heartbeat(&self) {
        warn!("send_heartbeat is a no-op on the event-loop adapter");
    }

    fn should_retry(&self) -> bool {
        let limit = self.config.reconnect_attempts;
        limit < 0 || self.attempt < limit as u32
    }

    async fn sleep_before_retry(&self) {
        tokio::time::sleep(Duration::from_secs_f64(self.config.retry_delay)).await;
    }

    async fn open_connection(&mut self) -> Result<Connection, Error> {
        if self.config.host.is_empty() {
            return Err(RpcError::IncorrectAmqpConfig {
                detail: "host is empty".to_owned(),
            }
            .into());
        }

        self.state = ConnectionState::Connecting;

        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(&self.config.to_amqp_uri(), options).await?;
        Ok(connection)
    }

    /// Opens a connection, applying the retry policy on failure. A negative
    /// `reconnect_attempts` retries forever.
    pub(crate) async fn connect_with_retry(&mut self) -> Result<Connection, Error> {
        loop {
            match self.open_connection().await {
                Ok(connection) => return Ok(connection),

                Err(err) => {
                    self.state = ConnectionState::Disconnected;
                    if !self.should_retry() {
                        return Err(err);
                    }

                    self.attempt += 1;
                    warn!(attempt = self.attempt, error = %err, "broker connect failed, retrying");
                    self.sleep_before_retry().await;
                }
            }
        }
    }

    /// Declares the exchanges, queue and bindings of a topology plan on a
    /// short-lived declaration channel, then closes it.
    pub async fn declare_topology(&mut self, plan: &TopologyPlan) -> Result<(), Error> {
        let connection = self.connect_with_retry().await?;
        let channel = connection.create_channel().await?;

        for exchange in &plan.exchanges {
            channel
                .exchange_declare(
                    exchange.as_ref(),
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        channel
            .queue_declare(
                &plan.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        for binding in &plan.bindings {
            channel
                .queue_bind(
                    &plan.queue,
                    binding.exchange.as_ref(),
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        channel
            .close(CLOSE_REPLY_SUCCESS, "declarations complete")
            .await?;
        connection
            .close(CLOSE_REPLY_SUCCESS, "declarations complete")
            .await?;
        Ok(())
    }

    /// Publishes a batch over an ephemeral connection, outside any consume
    /// loop (the caller path).
    pub async fn publish_once(&mut self, commands: Vec<PublishCommand>) -> Result<(), Error> {
        let connection = self.connect_with_retry().await?;
        let channel = connection.create_channel().await?;

        for command in &commands {
            publish(&channel, command).await?;
        }

        channel.close(CLOSE_REPLY_SUCCESS, "publish complete").await?;
        connection
            .close(CLOSE_REPLY_SUCCESS, "publish complete")
            .await?;
        Ok(())
    }

    /// Runs the consume loop for `queue` until stopped or the retry policy is
    /// exhausted.
    pub async fn run(
        &mut self,
        queue: &str,
        preprocessor: PreProcessor,
        publish_rx: UnboundedReceiver<PublishCommand>,
        command_rx: UnboundedReceiver<Command>,
    ) -> Result<(), Error> {
        consume::consume_loop(self, queue, preprocessor, publish_rx, command_rx).await
    }
}

pub(crate) async fn publish(channel: &Channel, command: &PublishCommand) -> Result<(), Error> {
    let properties = BasicProperties::default().with_headers(to_field_table(&command.frame.headers));

    channel
        .basic_publish(
            command.exchange.as_ref(),
            command.routing_key.as_ref(),
            BasicPublishOptions::default(),
            &command.frame.body,
            properties,
        )
        .await?
        .await?;

    Ok(())
}

fn to_field_table(headers: &HashMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            ShortString::from(key.as_str()),
            AMQPValue::LongString(value.clone().into()),
        );
    }
    table
}

pub(crate) fn frame_from_delivery(delivery: &Delivery) -> RawFrame {
    let mut headers = HashMap::new();

    if let Some(table) = delivery.properties.headers() {
        for (key, value) in table.inner() {
            let value = match value {
                AMQPValue::LongString(value) => {
                    Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
                }
                AMQPValue::ShortString(value) => Some(value.as_str().to_owned()),
                _ => None,
            };

            if let Some(value) = value {
                headers.insert(key.as_str().to_owned(), value);
            }
        }
    }

    RawFrame {
        headers,
        body: delivery.data.clone(),
    }
}
