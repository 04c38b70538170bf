// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Abstraction over RabbitMQ
//!
//! `Queue` is the capability contract: connect, disconnect, push, pop, ack and
//! nack against a single queue. `RabbitMQQueue` implements it by delegating to an
//! `AmqpConnector` and translating every client failure into a `QueueError`:
//! connection-level failures become `QueueError::Connection`, anything else
//! becomes `QueueError::Operation`.
//!
//! ```no_run
//! use rabbitmq_queue::{message::PopOptions, queue::{Queue, RabbitMQQueue}};
//!
//! # async fn run() -> Result<(), rabbitmq_queue::errors::QueueError> {
//! let mut queue = RabbitMQQueue::builder("orders").host("broker").build();
//! queue.connect(true).await?;
//! queue.push(b"blah", &Default::default()).await?;
//! let msg = queue.pop(&PopOptions::new().no_ack()).await?;
//! queue.disconnect().await;
//! # Ok(())
//! # }
//! ```

use crate::{
    config::RabbitMQConfigs,
    connection::{AmqpChannel, AmqpConnection, AmqpConnector, LapinConnector},
    errors::{AmqpError, QueueError},
    message::{Message, PopOptions, PublishOptions},
    otel,
};
use async_trait::async_trait;
use opentelemetry::{global, trace::Span, KeyValue};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Delay between two connection attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Operations available on a message queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Opens the connection and the channel.
    ///
    /// With `retry` set, connection-level failures are logged and the attempt is
    /// repeated after a delay instead of being returned.
    async fn connect(&mut self, retry: bool) -> Result<(), QueueError>;

    /// Tears the connection down. Failures are logged, never returned.
    async fn disconnect(&mut self);

    /// Publishes a message to the queue.
    ///
    /// # Parameters
    /// * `message` - The raw payload
    /// * `options` - Publish flags and message properties
    ///
    /// # Returns
    /// Ok(()) on success, `QueueError::Connection` when the connection failed or
    /// `QueueError::Operation` for any other failure
    async fn push(&self, message: &[u8], options: &PublishOptions) -> Result<(), QueueError>;

    /// Waits for exactly one message.
    ///
    /// # Parameters
    /// * `options` - Consumer settings and an optional timeout
    ///
    /// # Returns
    /// The received message, or the same error kinds as `push`
    async fn pop(&self, options: &PopOptions) -> Result<Message, QueueError>;

    /// Acknowledges a message received with manual ack.
    ///
    /// # Parameters
    /// * `msgid` - The `msgid` of the popped message
    async fn ack(&self, msgid: u64) -> Result<(), QueueError>;

    /// Rejects a message received with manual ack.
    ///
    /// # Parameters
    /// * `msgid` - The `msgid` of the popped message
    /// * `requeue` - Whether the broker puts the message back in the queue
    async fn nack(&self, msgid: u64, requeue: bool) -> Result<(), QueueError>;
}

/// How `connect` behaves on connection-level failures when retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    fn next_attempt(attempts: u32) -> u32 {
        attempts.saturating_add(1)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// A single RabbitMQ queue.
///
/// The connection and channel are owned by the handle: created by `connect` and
/// dropped by `disconnect`. Messages are published to `exchange` with
/// `routing_key` and consumed from `queue`.
pub struct RabbitMQQueue {
    queue: String,
    exchange: String,
    routing_key: String,
    cfg: RabbitMQConfigs,
    connector: Arc<dyn AmqpConnector>,
    retry: RetryPolicy,
    conn: Option<Box<dyn AmqpConnection>>,
    channel: Option<Box<dyn AmqpChannel>>,
}

impl RabbitMQQueue {
    /// Creates a handle for `queue` on a local broker with default parameters.
    pub fn new(queue: &str) -> RabbitMQQueue {
        RabbitMQQueue::builder(queue).build()
    }

    /// Starts building a handle for `queue`.
    ///
    /// # Parameters
    /// * `queue` - The name of the queue messages are consumed from
    ///
    /// # Returns
    /// A builder with default connection parameters
    pub fn builder(queue: &str) -> RabbitMQQueueBuilder {
        RabbitMQQueueBuilder::new(queue)
    }

    /// The name of the queue messages are consumed from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The exchange messages are published to, `""` for the default exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The routing key used when publishing.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// The connection parameters used by `connect`.
    pub fn configs(&self) -> &RabbitMQConfigs {
        &self.cfg
    }

    /// Whether `connect` succeeded and `disconnect` was not called since.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn channel(&self) -> Result<&dyn AmqpChannel, QueueError> {
        self.channel
            .as_deref()
            .ok_or(QueueError::Operation(AmqpError::NotConnected))
    }

    async fn open(&self) -> Result<(Box<dyn AmqpConnection>, Box<dyn AmqpChannel>), AmqpError> {
        let conn = self.connector.connect(&self.cfg).await?;

        match conn.create_channel().await {
            Ok(channel) => Ok((conn, channel)),
            Err(err) => {
                if let Err(close_err) = conn.close().await {
                    debug!(error = close_err.to_string(), "failure to close connection");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Queue for RabbitMQQueue {
    async fn connect(&mut self, retry: bool) -> Result<(), QueueError> {
        if self.is_connected() {
            warn!(queue = self.queue, "already connected, reconnecting");
            self.disconnect().await;
        }

        let mut attempts: u32 = 0;
        loop {
            attempts = RetryPolicy::next_attempt(attempts);
            info!(queue = self.queue, attempt = attempts, "connecting to queue...");

            match self.open().await {
                Ok((conn, channel)) => {
                    self.conn = Some(conn);
                    self.channel = Some(channel);
                    info!(queue = self.queue, "connected");
                    return Ok(());
                }
                Err(err) if err.is_connection_level() => {
                    error!(error = err.to_string(), "failure to connect to queue");

                    if !retry || self.retry.exhausted(attempts) {
                        return Err(QueueError::Connection(err));
                    }

                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) => {
                    error!(error = err.to_string(), "failure to open the queue channel");
                    return Err(QueueError::Operation(err));
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        info!(queue = self.queue, "disconnecting from queue...");

        let channel = self.channel.take();
        let conn = self.conn.take();

        match &channel {
            Some(channel) => {
                if let Err(err) = channel.cancel().await {
                    error!(error = err.to_string(), "failure to cancel consumer");
                }
                if let Err(err) = channel.close().await {
                    error!(error = err.to_string(), "failure to close channel");
                }
            }
            None => warn!("no channel to close"),
        }

        match &conn {
            Some(conn) => {
                if let Err(err) = conn.close().await {
                    error!(error = err.to_string(), "failure to close connection");
                }
            }
            None => warn!("no connection to close"),
        }

        info!(queue = self.queue, "disconnected");
    }

    async fn push(&self, message: &[u8], options: &PublishOptions) -> Result<(), QueueError> {
        let channel = self.channel()?;
        let properties = options.properties(otel::current_context_headers());

        channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                options.mandatory,
                message,
                properties,
            )
            .await?;

        debug!(
            exchange = self.exchange,
            routing_key = self.routing_key,
            "message published"
        );
        Ok(())
    }

    async fn pop(&self, options: &PopOptions) -> Result<Message, QueueError> {
        let channel = self.channel()?;
        let delivery = channel.consume_one(&self.queue, options).await?;

        let (_, mut span) = otel::new_span(
            &delivery.properties,
            &global::tracer(otel::TRACER_NAME),
            &format!("{} receive", self.queue),
        );
        span.set_attribute(delivery_tag_attribute(delivery.delivery_tag));
        span.end();

        debug!(queue = self.queue, msgid = delivery.delivery_tag, "message received");
        Ok(Message::new(delivery.delivery_tag, delivery.data))
    }

    async fn ack(&self, msgid: u64) -> Result<(), QueueError> {
        self.channel()?.basic_ack(msgid).await?;
        Ok(())
    }

    async fn nack(&self, msgid: u64, requeue: bool) -> Result<(), QueueError> {
        self.channel()?.basic_nack(msgid, requeue).await?;
        Ok(())
    }
}

/// Span attribute holding a delivery tag, saturated to the i64 range.
fn delivery_tag_attribute(tag: u64) -> KeyValue {
    KeyValue::new(
        "messaging.rabbitmq.delivery_tag",
        i64::try_from(tag).unwrap_or(i64::MAX),
    )
}

/// Builder for `RabbitMQQueue`.
///
/// Every setting is optional except the queue name. The routing key defaults to
/// the queue name and the exchange to the default exchange (`""`).
pub struct RabbitMQQueueBuilder {
    queue: String,
    exchange: String,
    routing_key: Option<String>,
    cfg: RabbitMQConfigs,
    connector: Option<Arc<dyn AmqpConnector>>,
    retry: RetryPolicy,
}

impl RabbitMQQueueBuilder {
    /// Creates a builder for `queue` with default parameters.
    ///
    /// # Parameters
    /// * `queue` - The name of the queue
    pub fn new(queue: &str) -> Self {
        RabbitMQQueueBuilder {
            queue: queue.to_owned(),
            exchange: String::new(),
            routing_key: None,
            cfg: RabbitMQConfigs::default(),
            connector: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces every connection parameter at once.
    ///
    /// # Parameters
    /// * `cfg` - The connection parameters, e.g. from `RabbitMQConfigs::from_env`
    ///
    /// # Returns
    /// Self for method chaining
    pub fn configs(mut self, cfg: RabbitMQConfigs) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets the broker host.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn host(mut self, host: &str) -> Self {
        self.cfg.host = host.to_owned();
        self
    }

    /// Sets the broker port.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn port(mut self, port: u16) -> Self {
        self.cfg.port = port;
        self
    }

    /// Sets the virtual host.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn vhost(mut self, vhost: &str) -> Self {
        self.cfg.vhost = vhost.to_owned();
        self
    }

    /// Sets the user name used for plain authentication.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn username(mut self, user: &str) -> Self {
        self.cfg.user = user.to_owned();
        self
    }

    /// Sets the password used for plain authentication.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn password(mut self, password: &str) -> Self {
        self.cfg.password = password.to_owned();
        self
    }

    /// Sets the heartbeat interval.
    ///
    /// # Parameters
    /// * `seconds` - Heartbeat interval in seconds, `0` disables heartbeats
    ///
    /// # Returns
    /// Self for method chaining
    pub fn heartbeat(mut self, seconds: u16) -> Self {
        self.cfg.heartbeat = Some(seconds);
        self
    }

    /// Sets the maximum frame size.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn frame_max(mut self, size: u32) -> Self {
        self.cfg.frame_max = Some(size);
        self
    }

    /// Sets the maximum number of channels.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn channel_max(mut self, max: u16) -> Self {
        self.cfg.channel_max = Some(max);
        self
    }

    /// Sets the connection timeout.
    ///
    /// The timeout is sent in milliseconds; longer durations saturate.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.connection_timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the connection name shown by the broker.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn connection_name(mut self, name: &str) -> Self {
        self.cfg.connection_name = Some(name.to_owned());
        self
    }

    /// Sets the exchange messages are published to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.to_owned();
        self
    }

    /// Sets the routing key used when publishing.
    ///
    /// An empty key falls back to the queue name.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = Some(key.to_owned());
        self
    }

    /// Opens connections with `connector` instead of `lapin`.
    ///
    /// # Parameters
    /// * `connector` - Any `AmqpConnector` implementation
    ///
    /// # Returns
    /// Self for method chaining
    pub fn connector(mut self, connector: Arc<dyn AmqpConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the delay between two connection attempts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Bounds the number of attempts made by `connect(true)`.
    ///
    /// # Parameters
    /// * `attempts` - Maximum number of attempts, the first one included
    ///
    /// # Returns
    /// Self for method chaining
    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = Some(attempts);
        self
    }

    /// Builds the handle. No connection is opened until `connect`.
    pub fn build(self) -> RabbitMQQueue {
        let routing_key = match self.routing_key {
            Some(key) if !key.is_empty() => key,
            _ => self.queue.clone(),
        };

        RabbitMQQueue {
            queue: self.queue,
            exchange: self.exchange,
            routing_key,
            cfg: self.cfg,
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(LapinConnector)),
            retry: self.retry,
            conn: None,
            channel: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        MockAmqpChannel, MockAmqpConnection, MockAmqpConnector, RawDelivery,
    };
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    fn refused() -> AmqpError {
        AmqpError::ConnectionError("connection refused".to_owned())
    }

    fn connection_with(channel: MockAmqpChannel) -> MockAmqpConnection {
        let mut conn = MockAmqpConnection::new();
        let mut channel = Some(channel);
        conn.expect_create_channel()
            .times(1)
            .returning(move || Ok(Box::new(channel.take().unwrap()) as Box<dyn AmqpChannel>));
        conn
    }

    fn connector_with(conn: MockAmqpConnection) -> MockAmqpConnector {
        let mut connector = MockAmqpConnector::new();
        let mut conn = Some(conn);
        connector
            .expect_connect()
            .times(1)
            .returning(move |_| Ok(Box::new(conn.take().unwrap()) as Box<dyn AmqpConnection>));
        connector
    }

    async fn connected(channel: MockAmqpChannel) -> RabbitMQQueue {
        let connector = connector_with(connection_with(channel));
        let mut queue = RabbitMQQueue::builder("orders")
            .exchange("events")
            .connector(Arc::new(connector))
            .build();

        queue.connect(false).await.unwrap();
        queue
    }

    #[test]
    fn routing_key_defaults_to_queue_name() {
        let queue = RabbitMQQueue::new("orders");

        assert_eq!(queue.queue(), "orders");
        assert_eq!(queue.exchange(), "");
        assert_eq!(queue.routing_key(), "orders");
        assert_eq!(queue.configs(), &RabbitMQConfigs::default());
        assert!(!queue.is_connected());

        let queue = RabbitMQQueue::builder("orders").routing_key("").build();
        assert_eq!(queue.routing_key(), "orders");
    }

    #[test]
    fn builder_sets_connection_parameters() {
        let queue = RabbitMQQueue::builder("orders")
            .host("broker")
            .port(5673)
            .vhost("shop")
            .username("app")
            .password("secret")
            .heartbeat(10)
            .connection_timeout(Duration::from_secs(3))
            .connection_name("billing")
            .exchange("events")
            .routing_key("orders.created")
            .build();

        let cfg = queue.configs();
        assert_eq!(cfg.host, "broker");
        assert_eq!(cfg.port, 5673);
        assert_eq!(cfg.vhost, "shop");
        assert_eq!(cfg.user, "app");
        assert_eq!(cfg.password, "secret");
        assert_eq!(cfg.heartbeat, Some(10));
        assert_eq!(cfg.connection_timeout, Some(3000));
        assert_eq!(cfg.connection_name.as_deref(), Some("billing"));
        assert_eq!(queue.exchange(), "events");
        assert_eq!(queue.routing_key(), "orders.created");
    }

    #[test]
    fn long_connection_timeouts_saturate() {
        let queue = RabbitMQQueue::builder("orders")
            .connection_timeout(Duration::MAX)
            .build();

        assert_eq!(queue.configs().connection_timeout, Some(u64::MAX));
    }

    #[test]
    fn attempt_counter_saturates() {
        assert_eq!(RetryPolicy::next_attempt(1), 2);
        assert_eq!(RetryPolicy::next_attempt(u32::MAX), u32::MAX);
        assert!(!RetryPolicy::default().exhausted(u32::MAX));

        let bounded = RetryPolicy {
            max_attempts: Some(u32::MAX),
            ..Default::default()
        };
        assert!(bounded.exhausted(RetryPolicy::next_attempt(u32::MAX)));
    }

    #[test]
    fn delivery_tags_beyond_i64_saturate() {
        assert_eq!(delivery_tag_attribute(42).value, opentelemetry::Value::I64(42));
        assert_eq!(
            delivery_tag_attribute(u64::MAX).value,
            opentelemetry::Value::I64(i64::MAX)
        );
    }

    #[tokio::test]
    async fn connect_without_retry_fails_after_one_attempt() {
        let mut connector = MockAmqpConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(refused()));

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector))
            .build();

        let err = queue.connect(false).await.unwrap_err();

        assert_eq!(err, QueueError::Connection(refused()));
        assert!(!queue.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_succeeds_on_the_third_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut conn = Some(connection_with(MockAmqpChannel::new()));

        let mut connector = MockAmqpConnector::new();
        connector.expect_connect().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(refused())
            } else {
                Ok(Box::new(conn.take().unwrap()) as Box<dyn AmqpConnection>)
            }
        });

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector))
            .build();

        let started = tokio::time::Instant::now();
        queue.connect(true).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(queue.is_connected());
        let waited = started.elapsed();
        assert!(waited >= 2 * DEFAULT_RETRY_DELAY);
        assert!(waited < 3 * DEFAULT_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_retry_stops_at_max_attempts() {
        let mut connector = MockAmqpConnector::new();
        connector
            .expect_connect()
            .times(4)
            .returning(|_| Err(refused()));

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector))
            .retry_delay(Duration::from_millis(250))
            .max_connect_attempts(4)
            .build();

        let started = tokio::time::Instant::now();
        let err = queue.connect(true).await.unwrap_err();

        assert!(err.is_connection());
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test]
    async fn channel_failure_is_an_operation_error_and_closes_the_connection() {
        let mut conn = MockAmqpConnection::new();
        conn.expect_create_channel()
            .times(1)
            .returning(|| Err(AmqpError::ChannelError("limit reached".to_owned())));
        conn.expect_close().times(1).returning(|| Ok(()));

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector_with(conn)))
            .build();

        let err = queue.connect(true).await.unwrap_err();

        assert_eq!(
            err,
            QueueError::Operation(AmqpError::ChannelError("limit reached".to_owned()))
        );
        assert!(!queue.is_connected());
    }

    #[tokio::test]
    async fn disconnect_swallows_every_teardown_failure() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_cancel()
            .times(1)
            .returning(|| Err(AmqpError::CancelConsumerError("gone".to_owned())));
        channel
            .expect_close()
            .times(1)
            .returning(|| Err(AmqpError::ChannelError("already closed".to_owned())));

        let mut conn = connection_with(channel);
        conn.expect_close().times(1).returning(|| Err(refused()));

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector_with(conn)))
            .build();
        queue.connect(false).await.unwrap();

        queue.disconnect().await;

        assert!(!queue.is_connected());
        let err = queue.push(b"blah", &PublishOptions::new()).await.unwrap_err();
        assert_eq!(err, QueueError::Operation(AmqpError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        let mut queue = RabbitMQQueue::new("orders");

        queue.disconnect().await;

        assert!(!queue.is_connected());
    }

    #[tokio::test]
    async fn reconnecting_tears_down_the_previous_connection() {
        let mut first_channel = MockAmqpChannel::new();
        first_channel.expect_cancel().times(1).returning(|| Ok(()));
        first_channel.expect_close().times(1).returning(|| Ok(()));
        let mut first = connection_with(first_channel);
        first.expect_close().times(1).returning(|| Ok(()));

        let mut conns = VecDeque::from([first, connection_with(MockAmqpChannel::new())]);
        let mut connector = MockAmqpConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(move |_| Ok(Box::new(conns.pop_front().unwrap()) as Box<dyn AmqpConnection>));

        let mut queue = RabbitMQQueue::builder("orders")
            .connector(Arc::new(connector))
            .build();

        queue.connect(false).await.unwrap();
        queue.connect(false).await.unwrap();

        assert!(queue.is_connected());
    }

    #[tokio::test]
    async fn push_then_pop_returns_the_pushed_body() {
        let broker = Arc::new(Mutex::new(VecDeque::<Vec<u8>>::new()));
        let published = broker.clone();
        let delivered = broker.clone();

        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_publish()
            .withf(|exchange, routing_key, mandatory, _, _| {
                exchange.to_string() == "events"
                    && routing_key.to_string() == "orders"
                    && !*mandatory
            })
            .times(1)
            .returning(move |_, _, _, payload, _| {
                published.lock().unwrap().push_back(payload.to_vec());
                Ok(())
            });
        channel
            .expect_consume_one()
            .withf(|queue, options| queue.to_string() == "orders" && options.no_ack)
            .times(1)
            .returning(move |_, _| {
                let data = delivered.lock().unwrap().pop_front().unwrap();
                Ok(RawDelivery {
                    delivery_tag: 1,
                    data,
                    ..Default::default()
                })
            });

        let queue = connected(channel).await;

        queue.push(b"blah", &PublishOptions::new()).await.unwrap();
        let msg = queue.pop(&PopOptions::new().no_ack()).await.unwrap();

        assert_eq!(msg, Message::new(1, b"blah".to_vec()));
        assert!(broker.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_translates_client_failures() {
        let mut channel = MockAmqpChannel::new();
        let mut failures = VecDeque::from([
            refused(),
            AmqpError::PublishingError("precondition failed".to_owned()),
        ]);
        channel
            .expect_basic_publish()
            .times(2)
            .returning(move |_, _, _, _, _| Err(failures.pop_front().unwrap()));

        let queue = connected(channel).await;

        let err = queue.push(b"blah", &PublishOptions::new()).await.unwrap_err();
        assert_eq!(err, QueueError::Connection(refused()));

        let err = queue.push(b"blah", &PublishOptions::new()).await.unwrap_err();
        assert_eq!(
            err,
            QueueError::Operation(AmqpError::PublishingError("precondition failed".to_owned()))
        );
    }

    #[tokio::test]
    async fn pop_translates_client_failures() {
        let mut channel = MockAmqpChannel::new();
        let mut failures = VecDeque::from([refused(), AmqpError::ConsumeTimeout]);
        channel
            .expect_consume_one()
            .times(2)
            .returning(move |_, _| Err(failures.pop_front().unwrap()));

        let queue = connected(channel).await;
        let options = PopOptions::new().timeout(Duration::from_millis(10));

        let err = queue.pop(&options).await.unwrap_err();
        assert!(err.is_connection());

        let err = queue.pop(&options).await.unwrap_err();
        assert_eq!(err, QueueError::Operation(AmqpError::ConsumeTimeout));
    }

    #[tokio::test]
    async fn pop_without_connection_is_an_operation_error() {
        let queue = RabbitMQQueue::new("orders");

        let err = queue.pop(&PopOptions::new()).await.unwrap_err();

        assert_eq!(err, QueueError::Operation(AmqpError::NotConnected));
    }

    #[tokio::test]
    async fn ack_and_nack_forward_the_delivery_tag() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_ack()
            .withf(|tag| *tag == 7)
            .times(1)
            .returning(|_| Ok(()));
        channel
            .expect_basic_nack()
            .withf(|tag, requeue| *tag == 8 && *requeue)
            .times(1)
            .returning(|_, _| Err(AmqpError::NackMessageError("unknown tag".to_owned())));

        let queue = connected(channel).await;

        queue.ack(7).await.unwrap();
        let err = queue.nack(8, true).await.unwrap_err();
        assert_eq!(
            err,
            QueueError::Operation(AmqpError::NackMessageError("unknown tag".to_owned()))
        );
    }
}
