// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Queue
//!
//! Errors come in two layers. `AmqpError` describes what went wrong while talking
//! to the AMQP client (connection, channel, publish, consume, ack...). `QueueError`
//! is what the queue operations return: every client failure is translated into
//! either a *connection* error or an *operation* error, keeping the client error
//! as its source.

use lapin::protocol::AMQPErrorKind;
use thiserror::Error;

/// Represents errors reported by the underlying AMQP client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Connection-level failure: the broker is unreachable, the connection was
    /// closed, heartbeats were missed or the broker raised a hard error
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating or using a channel
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`")]
    NackMessageError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// No message arrived before the inactivity timeout
    #[error("no message received before the timeout")]
    ConsumeTimeout,

    /// The consumer stream ended
    #[error("consumer was closed")]
    ConsumerClosed,

    /// The operation requires an open channel
    #[error("not connected")]
    NotConnected,
}

impl AmqpError {
    /// Translates a lapin error.
    ///
    /// Connection-level failures always become `ConnectionError`, anything else
    /// is wrapped with `op`, which names the operation that failed.
    pub fn from_lapin(err: lapin::Error, op: fn(String) -> AmqpError) -> AmqpError {
        if is_connection_level(&err) {
            AmqpError::ConnectionError(err.to_string())
        } else {
            op(err.to_string())
        }
    }

    /// Whether this failure concerns the connection itself.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, AmqpError::ConnectionError(_))
    }
}

fn is_connection_level(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::MissingHeartbeatError => true,
        lapin::Error::ProtocolError(amqp_err) => {
            matches!(amqp_err.kind(), AMQPErrorKind::Hard(_))
        }
        _ => false,
    }
}

/// Errors returned by queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The client reported a connection-level failure
    #[error("queue connection error")]
    Connection(#[source] AmqpError),

    /// Any other failure while operating on the queue
    #[error("queue operation error")]
    Operation(#[source] AmqpError),

    /// Error parsing a message payload
    #[error("failure to parse payload `{0}`")]
    ParsePayloadError(String),
}

impl QueueError {
    pub fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

impl From<AmqpError> for QueueError {
    fn from(err: AmqpError) -> Self {
        if err.is_connection_level() {
            QueueError::Connection(err)
        } else {
            QueueError::Operation(err)
        }
    }
}
