//! mqttv3 - asynchronous MQTT v3.1 client engine
//!
//! # Overview
//!
//! This crate implements the client side of MQTT v3.1 (`MQIsdp`, protocol
//! level 3) on top of tokio:
//! - Byte-exact wire codec for all fourteen control packets
//! - QoS 0/1/2 delivery handshakes over concurrency-safe delivery stores
//! - Keep-alive with PINGREQ/PINGRESP
//! - Connection supervision with linear backoff reconnects and in-flight resend
//! - An [`EventSink`] capability trait through which the application is notified
//!
//! # Quick Start
//!
//! ```rust
//! use mqttv3::protocol::{Packet, Publish, QoS};
//!
//! let publish = Publish::new("sensors/1", "21.5", QoS::AtLeastOnce, false).with_message_id(10);
//! let bytes = Packet::Publish(publish.clone()).to_bytes().unwrap();
//!
//! assert_eq!(bytes[0], 0x32);
//! assert_eq!(Packet::from_bytes(&bytes).unwrap(), Packet::Publish(publish));
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use error::{MqttError, MqttResult};
pub use protocol::{Packet, QoS};
pub use transport::mqtt::{ConnectOptions, ConnectionState, EventSink, MqttClient};
pub use transport::{Connector, TcpConnector};
