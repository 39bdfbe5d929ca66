//! Pure connection state management for the MQTT client
//!
//! This module contains pure functions for connection state, reconnect
//! backoff, connect options, broker addresses and client identifiers.

use crate::error::MqttError;
use crate::protocol::{Connect, QoS, Will};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Duration;
use url::Url;

/// Port used when the broker URL does not name one
pub const DEFAULT_PORT: u16 = 1883;

/// Longest client identifier MQTT v3.1 allows
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Length of generated client identifiers
pub const GENERATED_CLIENT_ID_LEN: usize = 20;

/// Upper bound on establishing the byte stream
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state for the MQTT client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; either never connected, deliberately disconnected,
    /// or waiting between reconnect attempts
    Disconnected,
    /// Transport being established or CONNECT sent and CONNACK pending
    Connecting,
    /// CONNACK 0 received
    Connected,
    /// `disconnect()` in progress
    Disconnecting,
}

/// Reconnection backoff configuration
///
/// The delay before the first attempt is zero and grows by `interval_inc`
/// after every failed attempt, never exceeding `interval_max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub interval_inc: Duration,
    pub interval_max: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_inc: Duration::from_secs(3),
            interval_max: Duration::from_secs(120),
        }
    }
}

impl ReconnectConfig {
    pub fn from_secs(interval_inc_secs: u64, interval_max_secs: u64) -> Self {
        Self {
            interval_inc: Duration::from_secs(interval_inc_secs),
            interval_max: Duration::from_secs(interval_max_secs),
        }
    }

    /// Delay to wait before the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        self.interval_inc
            .checked_mul(steps)
            .unwrap_or(self.interval_max)
            .min(self.interval_max)
    }
}

/// Options for a `connect()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub user: Option<String>,
    pub password: Option<String>,
    pub lwt_topic: Option<String>,
    /// Defaults to `"<client id> is offline"`
    pub lwt_msg: Option<String>,
    pub lwt_qos: QoS,
    pub lwt_retain: bool,
    pub clean_session: bool,
    /// 0 disables keep-alive pings
    pub keep_alive_secs: u16,
    pub reconnect: ReconnectConfig,
    /// 0 dispatches on the reader task; n > 0 allows n concurrent dispatches
    pub dispatch_workers: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            lwt_topic: None,
            lwt_msg: None,
            lwt_qos: QoS::AtMostOnce,
            lwt_retain: false,
            clean_session: false,
            keep_alive_secs: 60,
            reconnect: ReconnectConfig::default(),
            dispatch_workers: 0,
        }
    }
}

impl ConnectOptions {
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_will(mut self, topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        self.lwt_topic = Some(topic.into());
        self.lwt_qos = qos;
        self.lwt_retain = retain;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive_secs: u16) -> Self {
        self.keep_alive_secs = keep_alive_secs;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(u64::from(self.keep_alive_secs)))
    }

    /// Build the CONNECT frame for `client_id` (pure function)
    pub fn build_connect_packet(&self, client_id: &str) -> Connect {
        let mut connect = Connect::new(client_id, self.keep_alive_secs);
        connect.clean_session = self.clean_session;
        connect.username = self.user.clone();
        connect.password = self.password.clone();
        connect.will = self.lwt_topic.as_ref().map(|topic| Will {
            topic: topic.clone(),
            message: self
                .lwt_msg
                .clone()
                .unwrap_or_else(|| format!("{client_id} is offline")),
            qos: self.lwt_qos,
            retain: self.lwt_retain,
        });
        connect
    }
}

/// Host and port of the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

/// Parse `mqtt://host[:port]` (or `tcp://`) into a broker address
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(MqttError::InvalidBrokerUrl(broker_url.to_string()));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    Ok(BrokerAddress {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_PORT),
    })
}

/// Trim and validate a client identifier, generating one when absent
pub fn resolve_client_id(client_id: Option<&str>) -> Result<String, MqttError> {
    let client_id = match client_id {
        Some(id) => id.trim().to_string(),
        None => generate_client_id(),
    };

    let len = client_id.chars().count();
    if len == 0 || len > MAX_CLIENT_ID_LEN {
        return Err(MqttError::InvalidClientId(client_id));
    }
    Ok(client_id)
}

/// Random 20-character alphanumeric identifier
pub fn generate_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}
