// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages and Operation Options
//!
//! This module holds the envelope returned by `pop` and the options accepted by
//! `push` and `pop`. Options are forwarded to the client, nothing here changes
//! delivery semantics.

use crate::errors::QueueError;
use lapin::{
    types::{AMQPValue, FieldTable, LongInt, LongLongInt, LongString, LongUInt, ShortString},
    BasicProperties,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use uuid::Uuid;

/// Delivery mode flagging a message as persistent
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A message received from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Delivery tag assigned by the broker, used to ack or nack the message
    pub msgid: u64,
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message envelope.
    ///
    /// # Parameters
    /// * `msgid` - The delivery tag assigned by the broker
    /// * `body` - The raw payload
    pub fn new(msgid: u64, body: Vec<u8>) -> Self {
        Message { msgid, body }
    }

    /// Decodes a JSON body.
    ///
    /// # Returns
    /// The decoded value or `QueueError::ParsePayloadError` when the body is not
    /// valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| QueueError::ParsePayloadError(err.to_string()))
    }
}

/// Header values supported when publishing.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Bool(bool),
    Int(i32),
    LongInt(i64),
    Uint(u32),
}

impl From<HeaderValue> for AMQPValue {
    fn from(value: HeaderValue) -> Self {
        match value {
            HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v)),
            HeaderValue::Bool(v) => AMQPValue::Boolean(v),
            HeaderValue::Int(v) => AMQPValue::LongInt(LongInt::from(v)),
            HeaderValue::LongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(v)),
            HeaderValue::Uint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
        }
    }
}

/// Options for `push`.
///
/// Every published message gets a fresh UUID as `message_id`; the remaining
/// properties are only set when asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub(crate) mandatory: bool,
    pub(crate) persistent: bool,
    pub(crate) content_type: Option<String>,
    pub(crate) message_type: Option<String>,
    pub(crate) headers: HashMap<String, HeaderValue>,
}

impl PublishOptions {
    /// Creates publish options with every flag off and no extra property.
    pub fn new() -> Self {
        PublishOptions::default()
    }

    /// Asks the broker to return the message when it cannot be routed.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Marks the message as persistent (delivery mode 2).
    ///
    /// Persistent messages survive a broker restart when they sit in a durable queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Sets the `content_type` property.
    ///
    /// # Parameters
    /// * `content_type` - MIME type of the payload, e.g. `application/json`
    ///
    /// # Returns
    /// Self for method chaining
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    /// Sets the `type` property of the message.
    ///
    /// # Parameters
    /// * `message_type` - Application-defined message type
    ///
    /// # Returns
    /// Self for method chaining
    pub fn message_type(mut self, message_type: &str) -> Self {
        self.message_type = Some(message_type.to_owned());
        self
    }

    /// Adds a header to the message.
    ///
    /// # Parameters
    /// * `key` - The header name
    /// * `value` - The header value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn header(mut self, key: &str, value: HeaderValue) -> Self {
        self.headers.insert(key.to_owned(), value);
        self
    }

    /// Builds the AMQP properties for a message.
    ///
    /// `headers` already holds the entries set by the queue itself (trace
    /// context); user headers are added on top of them.
    pub(crate) fn properties(&self, mut headers: BTreeMap<ShortString, AMQPValue>) -> BasicProperties {
        for (key, value) in self.headers.clone() {
            headers.insert(ShortString::from(key), value.into());
        }

        let mut props = BasicProperties::default()
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(FieldTable::from(headers));

        if let Some(content_type) = &self.content_type {
            props = props.with_content_type(ShortString::from(content_type.clone()));
        }

        if let Some(message_type) = &self.message_type {
            props = props.with_type(ShortString::from(message_type.clone()));
        }

        if self.persistent {
            props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        props
    }
}

/// Options for `pop`.
///
/// Everything but `timeout` configures the consumer, which is started on the
/// first `pop` after `connect` and lives until `disconnect`. Later calls must
/// pass the same consumer settings, a mismatch is reported as a consumer error.
/// `timeout` applies to each call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopOptions {
    pub(crate) no_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) consumer_tag: Option<String>,
    pub(crate) prefetch: Option<u16>,
    pub(crate) timeout: Option<Duration>,
}

impl PopOptions {
    /// Creates pop options: manual ack, shared consumer, broker-generated tag,
    /// no prefetch limit and no timeout.
    pub fn new() -> Self {
        PopOptions::default()
    }

    /// The broker considers messages acknowledged as soon as they are delivered.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    /// Requests exclusive access to the queue for the consumer.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the consumer tag instead of letting the broker generate one.
    ///
    /// # Parameters
    /// * `tag` - The consumer tag
    ///
    /// # Returns
    /// Self for method chaining
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = Some(tag.to_owned());
        self
    }

    /// Limits the number of unacknowledged messages delivered to the consumer.
    ///
    /// # Parameters
    /// * `count` - Maximum number of unacknowledged messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }

    /// Gives up waiting for a message after `timeout`.
    ///
    /// # Parameters
    /// * `timeout` - Maximum time to wait for one message
    ///
    /// # Returns
    /// Self for method chaining
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether a consumer started with `self` can serve a `pop` with `other`.
    pub(crate) fn same_consumer(&self, other: &PopOptions) -> bool {
        self.no_ack == other.no_ack
            && self.exclusive == other.exclusive
            && self.consumer_tag == other.consumer_tag
            && self.prefetch == other.prefetch
    }
}
