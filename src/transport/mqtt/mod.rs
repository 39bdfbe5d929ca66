//! MQTT v3.1 client engine
//!
//! This module separates pure decision logic from I/O so that most of the
//! engine can be tested without a socket.
//!
//! # Architecture
//!
//! - [`connection`] - connection state, backoff, connect options, client ids
//! - [`health_monitor`] - pure reconnection, state transition and keep-alive decisions
//! - [`message_handler`] - pure routing of decoded packets
//! - [`qos`] - QoS 0/1/2 handshake state machine over two [`DeliveryStore`]s
//! - [`keep_alive`] - activity tracking and the PINGREQ timer
//! - [`client`] - the [`MqttClient`] facade and its connection supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttv3::protocol::QoS;
//! use mqttv3::transport::mqtt::{ConnectOptions, EventSink, MqttClient};
//! use mqttv3::MqttError;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! impl EventSink for Printer {
//!     fn error_occurred(&self, error: &MqttError) {
//!         eprintln!("error: {error}");
//!     }
//!     fn on_connected(&self) {}
//!     fn on_disconnected(&self) {}
//!     fn connection_lost(&self) {}
//!     fn message_arrived(&self, topic: &str, payload: &[u8]) {
//!         println!("{topic}: {}", String::from_utf8_lossy(payload));
//!     }
//!     fn publish_complete(&self, _message_id: u16) {}
//! }
//!
//! # tokio_test::block_on(async {
//! let client = MqttClient::new("mqtt://localhost:1883", Some("sensor-1"), Arc::new(Printer))?;
//! client.connect(ConnectOptions::default()).await?;
//! client.wait_for_connection(Duration::from_secs(5)).await?;
//! client.subscribe("sensors/#", QoS::AtLeastOnce).await?;
//! client.publish("sensors/1", "21.5", QoS::AtLeastOnce, false).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod callback;
pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod ids;
pub mod keep_alive;
pub mod message_handler;
pub mod qos;
pub mod store;

// Re-export public types for convenience
pub use callback::EventSink;
pub use client::MqttClient;
pub use connection::{
    BrokerAddress, ConnectOptions, ConnectionState, ReconnectConfig, DEFAULT_PORT,
};
pub use health_monitor::{
    ConnectionEvent, HealthMetrics, HealthMonitor, KeepAliveDecision, ReconnectionDecision,
};
pub use ids::IdAllocator;
pub use keep_alive::ActivityTracker;
pub use message_handler::{Delivery, EventRoute, MessageHandler};
pub use qos::QosStateMachine;
pub use store::DeliveryStore;
