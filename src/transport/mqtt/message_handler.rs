//! Pure routing of decoded packets
//!
//! Every inbound packet is classified once into an [`EventRoute`]; the client
//! then executes the route. Session-level routes (CONNACK, PINGRESP,
//! DISCONNECT) are always handled on the reader task, delivery routes may go
//! to the dispatch pool.

use crate::protocol::{ConnackCode, Packet, PacketType, Publish, Suback};
use tracing::debug;

/// Pure packet routing decisions
pub struct MessageHandler;

impl MessageHandler {
    /// Route a decoded inbound packet (pure function)
    pub fn route_packet(packet: Packet) -> EventRoute {
        match packet {
            Packet::Connack(code) if code.is_accepted() => EventRoute::ConnectionAcknowledged,
            Packet::Connack(code) => EventRoute::ConnectionRefused(code),
            Packet::Publish(publish) => EventRoute::Delivery(Delivery::Publish(publish)),
            Packet::Puback(id) => EventRoute::Delivery(Delivery::Puback(id)),
            Packet::Pubrec(id) => EventRoute::Delivery(Delivery::Pubrec(id)),
            Packet::Pubrel(id) => EventRoute::Delivery(Delivery::Pubrel(id)),
            Packet::Pubcomp(id) => EventRoute::Delivery(Delivery::Pubcomp(id)),
            Packet::Suback(suback) => EventRoute::Delivery(Delivery::Suback(suback)),
            Packet::Unsuback(id) => EventRoute::Delivery(Delivery::Unsuback(id)),
            Packet::Pingresp => EventRoute::PingResponse,
            Packet::Disconnect => EventRoute::ServerDisconnect,
            other => EventRoute::Unexpected(other.packet_type()),
        }
    }

    /// Log a packet the broker should never send to a client
    pub fn log_unexpected(packet_type: PacketType) {
        debug!(?packet_type, "Ignoring client-to-server packet received from broker");
    }
}

/// Routing decisions for inbound packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK 0 - session accepted
    ConnectionAcknowledged,
    /// CONNACK with a refusal code
    ConnectionRefused(ConnackCode),
    /// Packet for the QoS state machine
    Delivery(Delivery),
    PingResponse,
    /// Broker sent DISCONNECT
    ServerDisconnect,
    /// CONNECT, SUBSCRIBE, UNSUBSCRIBE or PINGREQ from the broker
    Unexpected(PacketType),
}

/// Packets handled by the QoS state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Publish(Publish),
    Puback(u16),
    Pubrec(u16),
    Pubrel(u16),
    Pubcomp(u16),
    Suback(Suback),
    Unsuback(u16),
}
