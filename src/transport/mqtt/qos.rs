//! QoS delivery state machine
//!
//! Decides, for every frame sent or received, which acknowledgment must follow
//! and when the application sees a message or a completed publish. Outbound
//! and inbound handshakes are tracked in separate [`DeliveryStore`]s so an id
//! chosen by the broker never collides with one chosen locally.
//!
//! Methods return the packet (if any) that must go out next; the caller puts
//! it on the single writer queue.

use super::callback::EventSink;
use super::store::DeliveryStore;
use crate::error::MqttError;
use crate::protocol::{Message, Packet, PacketType, Publish, QoS, Suback, Subscribe, Unsubscribe};
use bytes::Bytes;
use tracing::{debug, warn};

/// Granted-QoS value a broker uses to reject a subscription
const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Default)]
pub struct QosStateMachine {
    outbound: DeliveryStore,
    inbound: DeliveryStore,
}

impl QosStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handshakes started locally (publish, subscribe, unsubscribe)
    pub fn outbound(&self) -> &DeliveryStore {
        &self.outbound
    }

    /// Handshakes started by the broker (received QoS 1/2 publishes)
    pub fn inbound(&self) -> &DeliveryStore {
        &self.inbound
    }

    pub fn pending_count(&self) -> usize {
        self.outbound.count() + self.inbound.count()
    }

    /// Record an outbound publish and build its PUBLISH frame.
    ///
    /// QoS 0 publishes are never stored and always carry id 0.
    pub fn track_publish(
        &self,
        message_id: u16,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Packet {
        let message_id = if qos == QoS::AtMostOnce { 0 } else { message_id };
        if qos > QoS::AtMostOnce {
            self.outbound.put(Message::new(
                PacketType::Publish,
                message_id,
                qos,
                topic,
                payload.clone(),
                retain,
            ));
        }

        Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            message_id,
            payload,
        })
    }

    pub fn track_subscribe(&self, message_id: u16, topic_pattern: &str, qos: QoS) -> Packet {
        self.outbound.put(Message::new(
            PacketType::Subscribe,
            message_id,
            qos,
            topic_pattern,
            Bytes::new(),
            false,
        ));
        Packet::Subscribe(Subscribe {
            message_id,
            topics: vec![(topic_pattern.to_string(), qos)],
        })
    }

    pub fn track_unsubscribe(&self, message_id: u16, topic_pattern: &str) -> Packet {
        self.outbound.put(Message::new(
            PacketType::Unsubscribe,
            message_id,
            QoS::AtLeastOnce,
            topic_pattern,
            Bytes::new(),
            false,
        ));
        Packet::Unsubscribe(Unsubscribe {
            message_id,
            topics: vec![topic_pattern.to_string()],
        })
    }

    /// Inbound PUBLISH
    pub fn on_publish(&self, publish: Publish, sink: &dyn EventSink) -> Option<Packet> {
        let message_id = publish.message_id;
        match publish.qos {
            QoS::AtMostOnce => {
                sink.message_arrived(&publish.topic, &publish.payload);
                None
            }
            QoS::AtLeastOnce => {
                self.inbound
                    .put(Message::from_publish(PacketType::Puback, &publish));
                sink.message_arrived(&publish.topic, &publish.payload);
                self.inbound.delete(message_id);
                Some(Packet::Puback(message_id))
            }
            QoS::ExactlyOnce => {
                if self.inbound.contains(message_id) {
                    debug!(
                        message_id,
                        dup = publish.dup,
                        "Duplicate QoS 2 publish, resending PUBREC"
                    );
                } else {
                    self.inbound
                        .put(Message::from_publish(PacketType::Pubrec, &publish));
                }
                Some(Packet::Pubrec(message_id))
            }
        }
    }

    /// Inbound PUBACK for a QoS 1 publish
    pub fn on_puback(&self, message_id: u16, sink: &dyn EventSink) -> Option<Packet> {
        self.complete_outbound(message_id, PacketType::Puback, sink);
        None
    }

    /// Inbound PUBREC for a QoS 2 publish.
    ///
    /// PUBREL goes out once; a repeated PUBREC after that is ignored.
    pub fn on_pubrec(&self, message_id: u16) -> Option<Packet> {
        let before = self.outbound.update(message_id, |message| {
            let before = (message.kind, message.qos);
            if before == (PacketType::Publish, QoS::ExactlyOnce) {
                message.kind = PacketType::Pubrel;
                message.sent_on = None;
            }
            before
        });

        match before {
            Some((PacketType::Publish, QoS::ExactlyOnce)) => Some(Packet::Pubrel(message_id)),
            Some((PacketType::Pubrel, _)) => {
                debug!(message_id, "PUBREL already sent, ignoring duplicate PUBREC");
                None
            }
            Some((waiting_for, _)) => {
                debug!(message_id, ?waiting_for, "PUBREC does not match pending handshake, ignoring");
                None
            }
            None => {
                debug!(message_id, "PUBREC for untracked message id");
                None
            }
        }
    }

    /// Inbound PUBREL: deliver the stored QoS 2 message exactly once.
    ///
    /// PUBCOMP is sent even for ids that already completed so a retransmitted
    /// PUBREL still gets its answer.
    pub fn on_pubrel(&self, message_id: u16, sink: &dyn EventSink) -> Option<Packet> {
        match self.inbound.delete(message_id) {
            Some(message) => sink.message_arrived(&message.topic, &message.payload),
            None => debug!(message_id, "PUBREL for completed message id"),
        }
        Some(Packet::Pubcomp(message_id))
    }

    /// Inbound PUBCOMP for a QoS 2 publish
    pub fn on_pubcomp(&self, message_id: u16, sink: &dyn EventSink) -> Option<Packet> {
        self.complete_outbound(message_id, PacketType::Pubcomp, sink);
        None
    }

    pub fn on_suback(&self, suback: &Suback, sink: &dyn EventSink) -> Option<Packet> {
        if !self.settle(suback.message_id, PacketType::Suback) {
            return None;
        }
        if suback.granted.contains(&SUBACK_FAILURE) {
            warn!(message_id = suback.message_id, granted = ?suback.granted, "Subscription rejected");
            sink.error_occurred(&MqttError::SubscriptionRejected {
                message_id: suback.message_id,
            });
        }
        None
    }

    pub fn on_unsuback(&self, message_id: u16) -> Option<Packet> {
        self.settle(message_id, PacketType::Unsuback);
        None
    }

    /// Note that the writer of transport `generation` took `packet` off the
    /// queue. Frames that carry no outbound handshake are ignored.
    pub fn mark_sent(&self, packet: &Packet, generation: u64) {
        let (message_id, kind) = match packet {
            Packet::Publish(publish) if publish.qos > QoS::AtMostOnce => {
                (publish.message_id, PacketType::Publish)
            }
            Packet::Pubrel(message_id) => (*message_id, PacketType::Pubrel),
            Packet::Subscribe(subscribe) => (subscribe.message_id, PacketType::Subscribe),
            Packet::Unsubscribe(unsubscribe) => (unsubscribe.message_id, PacketType::Unsubscribe),
            _ => return,
        };
        self.outbound.update(message_id, |message| {
            if message.kind == kind {
                message.sent_on = Some(generation);
            }
        });
    }

    /// Treat every frame still waiting in a discarded writer queue as sent on
    /// `generation`, so the next accepted session resends it.
    pub fn requeue_unsent(&self, generation: u64) {
        for message in self.outbound.snapshot() {
            if message.sent_on.is_none() {
                self.outbound.update(message.message_id, |stored| {
                    stored.sent_on.get_or_insert(generation);
                });
            }
        }
    }

    /// Frames to resend once the session on transport `generation` is accepted.
    ///
    /// Only records whose current frame went out on an earlier transport are
    /// repeated; anything still queued reaches the new writer on its own.
    /// Bumps the retry counter of every record that is resent.
    pub fn pending_retransmissions(&self, generation: u64) -> Vec<Packet> {
        let mut packets = Vec::new();
        for message in self.outbound.snapshot() {
            if !message.sent_on.is_some_and(|sent| sent < generation) {
                continue;
            }
            if let Some(packet) = message.retransmission() {
                self.outbound.update(message.message_id, |stored| {
                    stored.retries += 1;
                    stored.sent_on = None;
                });
                packets.push(packet);
            }
        }
        packets.sort_by_key(|packet| packet.message_id());
        packets
    }

    fn complete_outbound(&self, message_id: u16, ack: PacketType, sink: &dyn EventSink) {
        if self.settle(message_id, ack) {
            sink.publish_complete(message_id);
        }
    }

    /// Drop the outbound record `ack` finishes. An ack that does not fit the
    /// record's current step leaves it in place.
    fn settle(&self, message_id: u16, ack: PacketType) -> bool {
        if self
            .outbound
            .delete_if(message_id, |message| finishes(ack, message))
            .is_some()
        {
            return true;
        }
        match self.outbound.get(message_id) {
            Some(message) => debug!(
                message_id,
                ?ack,
                waiting_for = ?message.kind,
                "Acknowledgment does not match pending handshake, ignoring"
            ),
            None => debug!(message_id, ?ack, "Acknowledgment for untracked message id"),
        }
        false
    }
}

/// Whether `ack` is the last frame of the handshake `message` is waiting in
fn finishes(ack: PacketType, message: &Message) -> bool {
    match ack {
        PacketType::Puback => {
            message.kind == PacketType::Publish && message.qos == QoS::AtLeastOnce
        }
        PacketType::Pubcomp => message.kind == PacketType::Pubrel,
        PacketType::Suback => message.kind == PacketType::Subscribe,
        PacketType::Unsuback => message.kind == PacketType::Unsubscribe,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn test_qos0_publish_is_not_tracked() {
        let machine = QosStateMachine::new();
        let packet = machine.track_publish(0, "t", Bytes::from_static(b"x"), QoS::AtMostOnce, false);

        match packet {
            Packet::Publish(publish) => assert_eq!(publish.message_id, 0),
            other => panic!("unexpected packet {other:?}"),
        }
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn test_qos1_publish_completes_on_puback() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        machine.track_publish(7, "t", Bytes::from_static(b"x"), QoS::AtLeastOnce, false);
        assert!(machine.outbound().contains(7));

        assert_eq!(machine.on_puback(7, &sink), None);
        assert!(!machine.outbound().contains(7));
        assert_eq!(sink.completed(), vec![7]);

        // A repeated PUBACK does not complete twice
        machine.on_puback(7, &sink);
        assert_eq!(sink.completed(), vec![7]);
    }

    #[test]
    fn test_qos2_publish_handshake() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        machine.track_publish(9, "t", Bytes::from_static(b"x"), QoS::ExactlyOnce, false);

        assert_eq!(machine.on_pubrec(9), Some(Packet::Pubrel(9)));
        assert_eq!(machine.on_pubrec(9), None, "no second PUBREL");
        assert!(sink.completed().is_empty());

        assert_eq!(machine.on_pubcomp(9, &sink), None);
        assert_eq!(sink.completed(), vec![9]);
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn test_pubrec_for_untracked_id_is_ignored() {
        let machine = QosStateMachine::new();
        assert_eq!(machine.on_pubrec(99), None);
    }

    #[test]
    fn test_qos1_receive_delivers_then_acks() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        let publish = Publish::new("a/b", "hello", QoS::AtLeastOnce, false).with_message_id(4);

        assert_eq!(machine.on_publish(publish, &sink), Some(Packet::Puback(4)));
        assert_eq!(sink.messages(), vec![("a/b".to_string(), b"hello".to_vec())]);
        assert_eq!(machine.inbound().count(), 0);
    }

    #[test]
    fn test_qos2_receive_duplicate_delivers_once() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        let publish = Publish::new("a", "once", QoS::ExactlyOnce, false).with_message_id(3);
        let mut duplicate = publish.clone();
        duplicate.dup = true;

        assert_eq!(machine.on_publish(publish, &sink), Some(Packet::Pubrec(3)));
        assert_eq!(machine.on_publish(duplicate, &sink), Some(Packet::Pubrec(3)));
        assert!(sink.messages().is_empty(), "nothing delivered before PUBREL");

        assert_eq!(machine.on_pubrel(3, &sink), Some(Packet::Pubcomp(3)));
        assert_eq!(sink.messages().len(), 1);

        // Retransmitted PUBREL still answered, not redelivered
        assert_eq!(machine.on_pubrel(3, &sink), Some(Packet::Pubcomp(3)));
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_inbound_and_outbound_ids_do_not_collide() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        machine.track_publish(5, "out", Bytes::new(), QoS::ExactlyOnce, false);
        machine.on_publish(
            Publish::new("in", "", QoS::ExactlyOnce, false).with_message_id(5),
            &sink,
        );

        assert_eq!(machine.on_pubrec(5), Some(Packet::Pubrel(5)));
        machine.on_pubrel(5, &sink);
        assert_eq!(sink.messages()[0].0, "in");
        assert!(machine.outbound().contains(5));
    }

    #[test]
    fn test_suback_clears_record_and_reports_rejection() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        machine.track_subscribe(11, "a/#", QoS::AtLeastOnce);
        machine.track_subscribe(12, "b/#", QoS::AtLeastOnce);

        machine.on_suback(
            &Suback {
                message_id: 11,
                granted: vec![1],
            },
            &sink,
        );
        assert!(!machine.outbound().contains(11));
        assert!(sink.errors().is_empty());

        machine.on_suback(
            &Suback {
                message_id: 12,
                granted: vec![SUBACK_FAILURE],
            },
            &sink,
        );
        assert_eq!(sink.errors(), vec!["Subscription 12 rejected by broker"]);
    }

    #[test]
    fn test_unsuback_clears_record() {
        let machine = QosStateMachine::new();
        machine.track_unsubscribe(13, "a/#");
        assert!(machine.outbound().contains(13));
        machine.on_unsuback(13);
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn test_mismatched_acks_leave_records_alone() {
        let machine = QosStateMachine::new();
        let sink = RecordingSink::new();
        machine.track_subscribe(1, "a/#", QoS::AtLeastOnce);
        machine.track_publish(2, "t", Bytes::from_static(b"x"), QoS::ExactlyOnce, false);
        machine.track_publish(3, "t", Bytes::from_static(b"y"), QoS::AtLeastOnce, false);

        // PUBACK for a subscription, PUBCOMP before PUBREC
        machine.on_puback(1, &sink);
        machine.on_pubcomp(2, &sink);
        machine.on_puback(2, &sink);
        assert!(sink.completed().is_empty());

        // SUBACK and UNSUBACK never remove a publish
        machine.on_suback(
            &Suback {
                message_id: 3,
                granted: vec![SUBACK_FAILURE],
            },
            &sink,
        );
        machine.on_unsuback(3);
        assert!(sink.errors().is_empty());
        assert_eq!(machine.pending_count(), 3);

        // PUBREC on a QoS 1 publish does not start a release
        assert_eq!(machine.on_pubrec(3), None);
        assert_eq!(machine.outbound().get(3).unwrap().kind, PacketType::Publish);

        machine.on_pubrec(2);
        machine.on_pubcomp(2, &sink);
        machine.on_puback(3, &sink);
        assert_eq!(sink.completed(), vec![2, 3]);
        assert_eq!(machine.outbound().count(), 1);
    }

    #[test]
    fn test_pending_retransmissions() {
        let machine = QosStateMachine::new();
        let first = machine.track_publish(1, "t", Bytes::from_static(b"a"), QoS::AtLeastOnce, false);
        machine.track_publish(2, "t", Bytes::from_static(b"b"), QoS::ExactlyOnce, false);
        machine.on_pubrec(2);
        machine.mark_sent(&first, 1);
        machine.mark_sent(&Packet::Pubrel(2), 1);

        // Still queued or written on the current transport
        machine.track_publish(3, "t", Bytes::from_static(b"c"), QoS::AtLeastOnce, false);
        let current = machine.track_subscribe(4, "a/#", QoS::AtMostOnce);
        machine.mark_sent(&current, 2);

        let packets = machine.pending_retransmissions(2);
        assert_eq!(packets.len(), 2);
        match &packets[0] {
            Packet::Publish(publish) => {
                assert!(publish.dup);
                assert_eq!(publish.message_id, 1);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert_eq!(packets[1], Packet::Pubrel(2));
        assert_eq!(machine.outbound().get(1).unwrap().retries, 1);
        assert_eq!(machine.outbound().get(3).unwrap().retries, 0);

        // Resent frames wait in the queue again until a writer takes them
        assert!(machine.pending_retransmissions(3).is_empty());
    }

    #[test]
    fn test_requeue_unsent_marks_only_queued_frames() {
        let machine = QosStateMachine::new();
        let sent = machine.track_publish(1, "t", Bytes::from_static(b"a"), QoS::AtLeastOnce, false);
        machine.mark_sent(&sent, 1);
        machine.track_publish(2, "t", Bytes::from_static(b"b"), QoS::AtLeastOnce, false);

        machine.requeue_unsent(3);
        assert_eq!(machine.outbound().get(1).unwrap().sent_on, Some(1));
        assert_eq!(machine.outbound().get(2).unwrap().sent_on, Some(3));

        let resent: Vec<u16> = machine
            .pending_retransmissions(4)
            .iter()
            .filter_map(Packet::message_id)
            .collect();
        assert_eq!(resent, vec![1, 2]);
    }
}
