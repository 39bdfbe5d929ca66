//! Testing utilities and mock implementations
//!
//! Lets the client engine run end to end against scripted in-memory brokers,
//! without a real MQTT server.

pub mod mocks;

pub use mocks::*;
