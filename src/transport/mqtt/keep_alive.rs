//! Keep-alive scheduler
//!
//! The reader and writer mark the session active on every frame. A timer task
//! runs only while a transport exists and, every half keep-alive interval,
//! asks [`HealthMonitor::evaluate_keep_alive`] whether to send PINGREQ
//! or give the connection up.

use super::health_monitor::{HealthMonitor, KeepAliveDecision};
use crate::error::MqttError;
use crate::protocol::Packet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Activity and ping bookkeeping shared by reader, writer and timer
#[derive(Debug, Default)]
pub struct ActivityTracker {
    active: AtomicBool,
    ping_outstanding: AtomicBool,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame was sent or received
    pub fn touch(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Read and clear the activity flag
    pub fn take_active(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::SeqCst);
    }

    pub fn pong_received(&self) {
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }

    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::SeqCst)
    }

    /// Fresh state for a new transport
    pub fn reset(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }
}

/// Run keep-alive ticks until the connection is declared lost or the
/// outbound queue closes. Returns the reason it stopped.
pub async fn run_keep_alive(
    tracker: Arc<ActivityTracker>,
    keep_alive: Duration,
    outbound: mpsc::Sender<Packet>,
) -> MqttError {
    let period = HealthMonitor::keep_alive_tick_period(keep_alive);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let active = tracker.take_active();
        match HealthMonitor::evaluate_keep_alive(active, tracker.ping_outstanding()) {
            KeepAliveDecision::Idle => {}
            KeepAliveDecision::SendPing => {
                debug!("Connection idle, sending PINGREQ");
                tracker.ping_sent();
                if outbound.send(Packet::Pingreq).await.is_err() {
                    return MqttError::ChannelClosed;
                }
            }
            KeepAliveDecision::ConnectionLost => {
                warn!(?keep_alive, "PINGREQ unanswered, declaring connection lost");
                return MqttError::KeepAliveTimeout;
            }
        }
    }
}
