// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! The queue never talks to `lapin` directly. It goes through three small traits:
//!
//! - `AmqpConnector` opens connections from a set of parameters. This is the
//!   pluggable piece: tests and applications can hand their own connector to the
//!   queue builder.
//! - `AmqpConnection` opens channels and closes the connection.
//! - `AmqpChannel` publishes, consumes one message at a time, acks/nacks and
//!   closes.
//!
//! `LapinConnector`, `LapinConnection` and `LapinChannel` are the implementations
//! backed by `lapin`.

use crate::{config::RabbitMQConfigs, errors::AmqpError, message::PopOptions};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions,
    },
    protocol::basic::AMQPProperties,
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Reply code sent when closing channels and connections
pub const REPLY_SUCCESS: u16 = 200;

/// A message as handed over by the channel.
#[derive(Debug, Clone, Default)]
pub struct RawDelivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
    pub properties: AMQPProperties,
}

/// Opens connections to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn AmqpConnection>, AmqpError>;
}

/// An open connection to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel opened on an `AmqpConnection`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Waits for the next message on `queue`, starting the consumer if needed.
    async fn consume_one(&self, queue: &str, options: &PopOptions)
        -> Result<RawDelivery, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    /// Cancels the consumer started by `consume_one`, if any.
    async fn cancel(&self) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Connector backed by `lapin`.
#[derive(Debug, Clone, Default)]
pub struct LapinConnector;

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn AmqpConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let mut options = ConnectionProperties::default();
        if let Some(name) = &cfg.connection_name {
            options = options.with_connection_name(LongString::from(name.clone()));
        }

        let conn = match Connection::connect_uri(cfg.amqp_uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::from_lapin(err, AmqpError::ConnectionError))
            }
        }?;
        debug!("amqp connected");

        Ok(Box::new(LapinConnection { conn }))
    }
}

pub struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Box::new(LapinChannel::new(channel)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::from_lapin(err, AmqpError::ChannelError))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::from_lapin(err, AmqpError::ConnectionError))
    }
}

/// Consumer started by `consume_one` with the options it was started with.
struct RunningConsumer {
    consumer: Consumer,
    options: PopOptions,
}

pub struct LapinChannel {
    channel: Channel,
    consumer: Mutex<Option<RunningConsumer>>,
}

impl LapinChannel {
    pub fn new(channel: Channel) -> Self {
        LapinChannel {
            channel,
            consumer: Mutex::new(None),
        }
    }

    async fn start_consumer(&self, queue: &str, options: &PopOptions) -> Result<Consumer, AmqpError> {
        if let Some(prefetch) = options.prefetch {
            self.channel
                .basic_qos(prefetch, BasicQosOptions { global: false })
                .await
                .map_err(|err| AmqpError::from_lapin(err, AmqpError::QoSDeclarationError))?;
        }

        let consumer = self
            .channel
            .basic_consume(
                queue,
                options.consumer_tag.as_deref().unwrap_or_default(),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::from_lapin(err, AmqpError::ConsumerError)
            })?;

        debug!(queue, tag = consumer.tag().as_str(), "consumer started");
        Ok(consumer)
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory,
                    immediate: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::from_lapin(err, AmqpError::PublishingError))
            }
            _ => Ok(()),
        }
    }

    async fn consume_one(
        &self,
        queue: &str,
        options: &PopOptions,
    ) -> Result<RawDelivery, AmqpError> {
        let mut slot = self.consumer.lock().await;

        let running = match slot.take() {
            Some(running) => running,
            None => RunningConsumer {
                consumer: self.start_consumer(queue, options).await?,
                options: options.clone(),
            },
        };
        let running = slot.insert(running);

        if !running.options.same_consumer(options) {
            error!(queue, "consumer already running with different options");
            return Err(AmqpError::ConsumerError(format!(
                "consumer on `{}` already running with {:?}",
                queue, running.options
            )));
        }
        let consumer = &mut running.consumer;

        let next = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, consumer.next())
                .await
                .map_err(|_| AmqpError::ConsumeTimeout)?,
            None => consumer.next().await,
        };

        match next {
            Some(Ok(delivery)) => Ok(RawDelivery {
                delivery_tag: delivery.delivery_tag,
                data: delivery.data,
                properties: delivery.properties,
            }),
            Some(Err(err)) => {
                error!(error = err.to_string(), "errors consume msg");
                Err(AmqpError::from_lapin(err, AmqpError::ConsumerError))
            }
            None => {
                slot.take();
                Err(AmqpError::ConsumerClosed)
            }
        }
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::from_lapin(err, AmqpError::AckMessageError))
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| AmqpError::from_lapin(err, AmqpError::NackMessageError))
    }

    async fn cancel(&self) -> Result<(), AmqpError> {
        let Some(running) = self.consumer.lock().await.take() else {
            return Ok(());
        };

        let tag = running.consumer.tag();
        debug!(tag = tag.as_str(), "cancelling consumer");

        self.channel
            .basic_cancel(tag.as_str(), BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| AmqpError::from_lapin(err, AmqpError::CancelConsumerError))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| AmqpError::from_lapin(err, AmqpError::ChannelError))
    }
}
