//! Pure health monitoring and reconnection logic for the MQTT client
//!
//! This module contains pure functions for reconnection decisions,
//! connection state transitions and keep-alive liveness checks.

use super::connection::{ConnectionState, ReconnectConfig};
use crate::protocol::ConnackCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether and when to make the next connection attempt (pure function)
    ///
    /// `current_attempts` counts failed attempts since the last reset. Retries
    /// are unlimited; only a shutdown stops them.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(
        current_state: &ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectRequested | ConnectionEvent::TransportEstablished => {
                ConnectionState::Connecting
            }
            ConnectionEvent::ConnAckAccepted => ConnectionState::Connected,
            ConnectionEvent::ConnAckRefused(_)
            | ConnectionEvent::TransportLost(_)
            | ConnectionEvent::DisconnectCompleted => ConnectionState::Disconnected,
            ConnectionEvent::DisconnectRequested => match current_state {
                ConnectionState::Disconnected => ConnectionState::Disconnected,
                _ => ConnectionState::Disconnecting,
            },
        }
    }

    /// Liveness decision for one keep-alive tick (pure function)
    ///
    /// A PINGREQ still unanswered one tick after it was sent means the
    /// connection is gone; otherwise an idle tick sends a new PINGREQ.
    pub fn evaluate_keep_alive(active: bool, ping_outstanding: bool) -> KeepAliveDecision {
        match (active, ping_outstanding) {
            (_, true) => KeepAliveDecision::ConnectionLost,
            (false, false) => KeepAliveDecision::SendPing,
            (true, false) => KeepAliveDecision::Idle,
        }
    }

    /// Tick period for a keep-alive interval: half of it
    pub fn keep_alive_tick_period(keep_alive: Duration) -> Duration {
        (keep_alive / 2).max(Duration::from_millis(1))
    }

    /// Calculate health metrics for the client (pure function)
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        reconnect_count: u32,
        pending_messages: usize,
    ) -> HealthMetrics {
        HealthMetrics {
            uptime: connect_time.map(|t| t.elapsed()),
            reconnect_count,
            pending_messages,
            is_connected: connect_time.is_some(),
        }
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState, client_id: &str) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!(client_id, "MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!(client_id, "MQTT connection lost");
            }
            (ConnectionState::Connecting, ConnectionState::Disconnected) => {
                warn!(client_id, "MQTT connection attempt failed");
            }
            (_, ConnectionState::Disconnecting) => {
                info!(client_id, "MQTT client disconnecting");
            }
            (ConnectionState::Disconnecting, ConnectionState::Disconnected) => {
                info!(client_id, "MQTT client disconnected");
            }
            _ => {
                info!(client_id, "MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Log a broker refusal
    pub fn log_refusal(code: ConnackCode, client_id: &str) {
        error!(client_id, code = code.as_byte(), "{}", code);
    }

    /// Validate reconnection configuration (pure function)
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.interval_max < config.interval_inc {
            return Err(format!(
                "reconnect interval max ({:?}) must not be smaller than the increment ({:?})",
                config.interval_max, config.interval_inc
            ));
        }
        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Outcome of one keep-alive tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveDecision {
    /// Traffic flowed since the last tick
    Idle,
    /// Nothing flowed; send PINGREQ
    SendPing,
    /// Previous PINGREQ never answered
    ConnectionLost,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    TransportEstablished,
    ConnAckAccepted,
    ConnAckRefused(ConnackCode),
    TransportLost(String),
    DisconnectRequested,
    DisconnectCompleted,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Time since the current session was accepted
    pub uptime: Option<Duration>,
    /// Sessions re-established after a transport loss
    pub reconnect_count: u32,
    /// In-flight messages in the delivery stores
    pub pending_messages: usize,
    pub is_connected: bool,
}
