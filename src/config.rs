// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Parameters
//!
//! `RabbitMQConfigs` holds everything the client needs to open a connection:
//! the broker address, the virtual host, the credentials and the extra
//! connection options. The values are handed to the client as they are, no
//! validation happens here.

use lapin::uri::AMQPUri;
use serde::Deserialize;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_VHOST: &str = "/";
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";

/// Parameters used to open a connection to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    /// Heartbeat interval in seconds, negotiated with the broker when absent
    pub heartbeat: Option<u16>,
    pub frame_max: Option<u32>,
    pub channel_max: Option<u16>,
    /// Connection timeout in milliseconds
    pub connection_timeout: Option<u64>,
    /// Name shown for the connection in the broker management UI
    pub connection_name: Option<String>,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            vhost: DEFAULT_VHOST.to_owned(),
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            heartbeat: None,
            frame_max: None,
            channel_max: None,
            connection_timeout: None,
            connection_name: None,
        }
    }
}

impl RabbitMQConfigs {
    /// Loads the parameters from `RABBITMQ_*` environment variables.
    ///
    /// A `.env` file in the working directory is read first when present.
    /// Missing variables keep their default value.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                warn!(error = err.to_string(), "failure to load .env file");
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the parameters from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RabbitMQConfigs::default();

        RabbitMQConfigs {
            host: lookup("RABBITMQ_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "RABBITMQ_PORT").unwrap_or(defaults.port),
            vhost: lookup("RABBITMQ_VHOST").unwrap_or(defaults.vhost),
            user: lookup("RABBITMQ_USER").unwrap_or(defaults.user),
            password: lookup("RABBITMQ_PASSWORD").unwrap_or(defaults.password),
            heartbeat: parse_var(&lookup, "RABBITMQ_HEARTBEAT"),
            frame_max: parse_var(&lookup, "RABBITMQ_FRAME_MAX"),
            channel_max: parse_var(&lookup, "RABBITMQ_CHANNEL_MAX"),
            connection_timeout: parse_var(&lookup, "RABBITMQ_CONNECTION_TIMEOUT"),
            connection_name: lookup("RABBITMQ_CONNECTION_NAME"),
        }
    }

    /// Builds the URI handed to the client.
    pub fn amqp_uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();

        uri.authority.host = self.host.clone();
        uri.authority.port = self.port;
        uri.authority.userinfo.username = self.user.clone();
        uri.authority.userinfo.password = self.password.clone();
        uri.vhost = self.vhost.clone();
        uri.query.heartbeat = self.heartbeat;
        uri.query.frame_max = self.frame_max;
        uri.query.channel_max = self.channel_max;
        uri.query.connection_timeout = self.connection_timeout;

        uri
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw.as_str(), "ignoring unparsable variable");
            None
        }
    }
}
