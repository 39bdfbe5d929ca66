//! Error types for the MQTT client engine
//!
//! Framing errors come from the codec, transport errors from the byte stream,
//! and refusals from the broker's CONNACK. All of them reach the application
//! through [`crate::transport::mqtt::EventSink::error_occurred`] as well as
//! through `Result` returns on the public operations.

use crate::config::ConfigError;
use crate::protocol::{CodecError, ConnackCode};
use crate::transport::mqtt::ConnectionState;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum MqttError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Display text is the broker's refusal reason
    #[error("{0}")]
    ConnectionRefused(ConnackCode),

    #[error("Server sent disconnect")]
    ServerDisconnect,

    #[error("No PINGRESP received within the keep-alive interval")]
    KeepAliveTimeout,

    #[error("Subscription {message_id} rejected by broker")]
    SubscriptionRejected { message_id: u16 },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Client ID cannot be empty or more than 23 characters: {0:?}")]
    InvalidClientId(String),

    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Outbound queue closed")]
    ChannelClosed,
}

/// Result type for client operations
pub type MqttResult<T> = Result<T, MqttError>;
