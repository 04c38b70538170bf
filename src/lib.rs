// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod config;
pub mod connection;
pub mod errors;
pub mod message;
pub mod queue;

pub use config::RabbitMQConfigs;
pub use errors::{AmqpError, QueueError};
pub use message::{Message, PopOptions, PublishOptions};
pub use queue::{Queue, RabbitMQQueue};
