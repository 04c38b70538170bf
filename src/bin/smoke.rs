// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Manual smoke test against a running broker.
//!
//! Connects to `testq` (retrying until the broker is up), waits for a line on
//! stdin, pushes one message and then prints every popped message forever.
//! Connection parameters are read from `RABBITMQ_*` variables, log verbosity
//! from `RUST_LOG`.

use rabbitmq_queue::{PopOptions, PublishOptions, Queue, QueueError, RabbitMQConfigs, RabbitMQQueue};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const QUEUE_NAME: &str = "testq";

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let mut queue = RabbitMQQueue::builder(QUEUE_NAME)
        .configs(RabbitMQConfigs::from_env())
        .build();

    queue.connect(true).await?;

    let mut line = String::new();
    if let Err(err) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        error!(error = err.to_string(), "failure to read stdin");
    }

    queue.push(b"blah", &PublishOptions::new()).await?;

    let options = PopOptions::new().no_ack();
    loop {
        match queue.pop(&options).await {
            Ok(msg) => println!(
                "{{'msgid': {}, 'body': {:?}}}",
                msg.msgid,
                String::from_utf8_lossy(&msg.body)
            ),
            Err(err) => {
                error!(error = err.to_string(), "failure to pop message");
                queue.disconnect().await;
                return Err(err);
            }
        }
    }
}
