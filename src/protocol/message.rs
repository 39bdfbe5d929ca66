//! In-flight message record kept while a delivery handshake is pending

use super::packet::{Packet, PacketType, Publish, QoS, Subscribe, Unsubscribe};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One protocol-level payload whose acknowledgment handshake has not completed.
///
/// `kind` records the step the handshake is waiting on: an outbound QoS 2
/// publish starts as [`PacketType::Publish`] and moves to
/// [`PacketType::Pubrel`] once PUBREL has been sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: PacketType,
    pub message_id: u16,
    pub qos: QoS,
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    /// Transport the frame for the current step was handed to; `None` while
    /// it still waits in the writer queue
    pub sent_on: Option<u64>,
}

impl Message {
    pub fn new(
        kind: PacketType,
        message_id: u16,
        qos: QoS,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Self {
        Self {
            kind,
            message_id,
            qos,
            topic: topic.into(),
            payload: payload.into(),
            retain,
            created_at: Utc::now(),
            retries: 0,
            sent_on: None,
        }
    }

    /// Record for a received PUBLISH
    pub fn from_publish(kind: PacketType, publish: &Publish) -> Self {
        Self::new(
            kind,
            publish.message_id,
            publish.qos,
            publish.topic.clone(),
            publish.payload.clone(),
            publish.retain,
        )
    }

    /// Packet to send when this record must be transmitted again.
    ///
    /// Returns `None` for records that only track inbound handshakes.
    pub fn retransmission(&self) -> Option<Packet> {
        match self.kind {
            PacketType::Publish => Some(Packet::Publish(Publish {
                dup: true,
                qos: self.qos,
                retain: self.retain,
                topic: self.topic.clone(),
                message_id: self.message_id,
                payload: self.payload.clone(),
            })),
            PacketType::Pubrel => Some(Packet::Pubrel(self.message_id)),
            PacketType::Subscribe => Some(Packet::Subscribe(Subscribe {
                message_id: self.message_id,
                topics: vec![(self.topic.clone(), self.qos)],
            })),
            PacketType::Unsubscribe => Some(Packet::Unsubscribe(Unsubscribe {
                message_id: self.message_id,
                topics: vec![self.topic.clone()],
            })),
            _ => None,
        }
    }

    /// Age of the record in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_retransmission_sets_dup() {
        let message = Message::new(
            PacketType::Publish,
            42,
            QoS::AtLeastOnce,
            "topic",
            "payload",
            true,
        );

        match message.retransmission() {
            Some(Packet::Publish(publish)) => {
                assert!(publish.dup);
                assert!(publish.retain);
                assert_eq!(publish.message_id, 42);
                assert_eq!(publish.topic, "topic");
                assert_eq!(&publish.payload[..], b"payload");
            }
            other => panic!("unexpected retransmission: {other:?}"),
        }
    }

    #[test]
    fn test_pubrel_stage_retransmits_pubrel() {
        let message = Message::new(PacketType::Pubrel, 5, QoS::ExactlyOnce, "t", "", false);
        assert_eq!(message.retransmission(), Some(Packet::Pubrel(5)));
    }

    #[test]
    fn test_inbound_records_are_not_retransmitted() {
        let message = Message::new(PacketType::Pubrec, 3, QoS::ExactlyOnce, "t", "", false);
        assert_eq!(message.retransmission(), None);
    }

    #[test]
    fn test_new_message_defaults() {
        let message = Message::new(PacketType::Subscribe, 1, QoS::AtMostOnce, "a/#", "", false);
        assert_eq!(message.retries, 0);
        assert!(message.age_ms() >= 0);
    }
}
