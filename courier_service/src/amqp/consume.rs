//! The consume loop: one logical consumer per server, serial dispatch,
//! ack/reject per the error disposition, tolerant reconnection.

use {
    super::{frame_from_delivery, publish, AmqpDriver, Command, ConnectionState, CLOSE_REPLY_SUCCESS},
    crate::{
        error::{Disposition, Error},
        postprocessor::PublishCommand,
        preprocessor::PreProcessor,
    },
    futures_util::StreamExt,
    lapin::{
        message::Delivery,
        options::{BasicAckOptions, BasicConsumeOptions, BasicRejectOptions},
        types::FieldTable,
        Channel, Connection, Consumer,
    },
    tokio::sync::{mpsc::UnboundedReceiver, oneshot},
    tracing::{debug, error, info, warn},
};

const CONSUMER_TAG: &str = "courier";

enum LoopExit {
    /// Graceful stop; the acknowledgement channel is absent when the server
    /// side was dropped rather than asked to stop.
    Stop(Option<oneshot::Sender<()>>),

    /// The connection went away; apply the retry policy.
    Reconnect,
}

pub(crate) async fn consume_loop(
    driver: &mut AmqpDriver,
    queue: &str,
    mut preprocessor: PreProcessor,
    mut publish_rx: UnboundedReceiver<PublishCommand>,
    mut command_rx: UnboundedReceiver<Command>,
) -> Result<(), Error> {
    loop {
        let connection = driver.connect_with_retry().await?;

        let (channel, mut consumer) = match open_consumer(&connection, queue).await {
            Ok(pair) => pair,

            Err(err) => {
                driver.state = ConnectionState::Disconnected;
                if !driver.should_retry() {
                    return Err(err);
                }

                driver.attempt += 1;
                warn!(error = %err, "failed to open consumer channel, retrying");
                driver.sleep_before_retry().await;
                continue;
            }
        };

        driver.state = ConnectionState::Open;
        driver.attempt = 0;
        info!(queue, "consuming");

        let exit = loop {
            tokio::select! {
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        if let Err(err) =
                            handle_delivery(&channel, &mut preprocessor, &mut publish_rx, delivery)
                                .await
                        {
                            warn!(error = %err, "broker channel failed mid-delivery");
                            break LoopExit::Reconnect;
                        }
                    }

                    Some(Err(err)) => {
                        warn!(error = %err, "consumer stream error");
                        break LoopExit::Reconnect;
                    }

                    None => {
                        warn!("consumer stream ended");
                        break LoopExit::Reconnect;
                    }
                },

                command = publish_rx.recv() => match command {
                    Some(command) => {
                        if let Err(err) = publish(&channel, &command).await {
                            error!(error = %err, "publish failed");
                            break LoopExit::Reconnect;
                        }
                    }

                    // Every postprocessor is gone; nothing can publish again.
                    None => break LoopExit::Stop(None),
                },

                command = command_rx.recv() => match command {
                    Some(Command::Stop { tx }) => break LoopExit::Stop(Some(tx)),

                    // Control side dropped; shut down gracefully.
                    None => break LoopExit::Stop(None),
                },
            }
        };

        match exit {
            LoopExit::Stop(tx) => {
                driver.state = ConnectionState::Draining;
                if let Err(err) = drain_publishes(&channel, &mut publish_rx).await {
                    warn!(error = %err, "failed to flush queued publishes while draining");
                }

                channel
                    .close(CLOSE_REPLY_SUCCESS, "server stopping")
                    .await
                    .ok();
                connection
                    .close(CLOSE_REPLY_SUCCESS, "server stopping")
                    .await
                    .ok();

                driver.state = ConnectionState::Closed;
                if let Some(tx) = tx {
                    tx.send(()).ok();
                }

                return Ok(());
            }

            LoopExit::Reconnect => {
                driver.state = ConnectionState::Disconnected;
                connection.close(CLOSE_REPLY_SUCCESS, "reconnecting").await.ok();

                if !driver.should_retry() {
                    return Err(Error::NotConnected);
                }

                driver.attempt += 1;
                warn!(attempt = driver.attempt, "connection lost, reconnecting");
                driver.sleep_before_retry().await;
            }
        }
    }
}

async fn open_consumer(connection: &Connection, queue: &str) -> Result<(Channel, Consumer), Error> {
    let channel = connection.create_channel().await?;
    let consumer = channel
        .basic_consume(
            queue,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok((channel, consumer))
}

/// Dispatches one delivery and settles it. The delivery is acknowledged only
/// after the dispatch returned and its queued publishes were flushed.
async fn handle_delivery(
    channel: &Channel,
    preprocessor: &mut PreProcessor,
    publish_rx: &mut UnboundedReceiver<PublishCommand>,
    delivery: Delivery,
) -> Result<(), Error> {
    let frame = frame_from_delivery(&delivery);
    let outcome = preprocessor.process(&frame);

    drain_publishes(channel, publish_rx).await?;

    match outcome {
        Ok(()) => {
            debug!(delivery_tag = delivery.delivery_tag, "ack");
            delivery.acker.ack(BasicAckOptions::default()).await?;
        }

        Err(err) => match err.disposition() {
            Disposition::Ack => {
                match &err {
                    Error::Rpc(rpc) if !rpc.is_ackable() => {
                        error!(error = %err, "dispatch failed, acking");
                    }
                    _ => warn!(error = %err, "dispatch failed, acking"),
                }
                delivery.acker.ack(BasicAckOptions::default()).await?;
            }

            Disposition::Reject => {
                warn!(error = %err, "dispatch failed, rejecting for redelivery");
                delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: true })
                    .await?;
            }
        },
    }

    Ok(())
}

async fn drain_publishes(
    channel: &Channel,
    publish_rx: &mut UnboundedReceiver<PublishCommand>,
) -> Result<(), Error> {
    while let Ok(command) = publish_rx.try_recv() {
        publish(channel, &command).await?;
    }

    Ok(())
}
