//! Application event sink

use crate::error::MqttError;

/// Receiver of connection and delivery notifications.
///
/// The engine calls these from its reader or dispatch tasks and never waits
/// on anything but the call itself, so implementations should return quickly
/// and hand longer work off to their own tasks.
pub trait EventSink: Send + Sync {
    /// A framing, protocol, refusal or transport error was observed
    fn error_occurred(&self, error: &MqttError);

    /// The broker accepted the session (CONNACK 0)
    fn on_connected(&self);

    /// A deliberate `disconnect()` completed
    fn on_disconnected(&self);

    /// An established session dropped without a `disconnect()` call
    fn connection_lost(&self);

    /// An application message was delivered according to its QoS
    fn message_arrived(&self, topic: &str, payload: &[u8]);

    /// An outbound QoS 1 or QoS 2 publish finished its handshake
    fn publish_complete(&self, message_id: u16);
}
