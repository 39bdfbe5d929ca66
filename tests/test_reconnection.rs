//! Connection supervision: backoff, resend after loss, refusals and shutdown


use mqttv3::protocol::{ConnackCode, Packet, QoS};
use mqttv3::testing::{ConnectOutcome, SinkEvent};
use mqttv3::transport::mqtt::ReconnectConfig;
use mqttv3::{ConnectionState, MqttError};
use std::time::Duration;
use test_helpers::{test_options, within, Harness};

/// Generous bound for tests running on paused time
const VIRTUAL_WAIT: Duration = Duration::from_secs(600);

#[tokio::test(start_paused = true)]
async fn test_failed_attempts_back_off_linearly() {
    let mut harness = Harness::with_script(vec![ConnectOutcome::Fail, ConnectOutcome::Fail]);
    let options = test_options().with_reconnect(ReconnectConfig::from_secs(2, 10));
    harness.client.connect(options).await.unwrap();

    let mut broker = tokio::time::timeout(VIRTUAL_WAIT, harness.brokers.recv())
        .await
        .unwrap()
        .unwrap();
    broker.accept().await.unwrap();
    harness
        .client
        .wait_for_connection(VIRTUAL_WAIT)
        .await
        .unwrap();

    let attempts = harness.connector.attempts();
    assert_eq!(attempts.len(), 3);
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_secs(3));
    assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_secs(5));

    // Each failed attempt is reported as a transport error
    let errors = harness.sink.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.starts_with("Transport error")));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let mut harness = Harness::with_script(vec![ConnectOutcome::Fail; 4]);
    let options = test_options().with_reconnect(ReconnectConfig::from_secs(3, 5));
    harness.client.connect(options).await.unwrap();

    tokio::time::timeout(VIRTUAL_WAIT, harness.brokers.recv())
        .await
        .unwrap()
        .unwrap();

    let attempts = harness.connector.attempts();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![3, 5, 5, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_loss_before_connack_counts_as_failed_attempt() {
    let mut harness = Harness::new();
    let options = test_options().with_reconnect(ReconnectConfig::from_secs(4, 20));
    harness.client.connect(options).await.unwrap();

    let mut first = tokio::time::timeout(VIRTUAL_WAIT, harness.brokers.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first.expect_packet().await.unwrap(), Packet::Connect(_)));
    first.close();

    let mut second = tokio::time::timeout(VIRTUAL_WAIT, harness.brokers.recv())
        .await
        .unwrap()
        .unwrap();
    second.accept().await.unwrap();
    harness
        .client
        .wait_for_connection(VIRTUAL_WAIT)
        .await
        .unwrap();

    let attempts = harness.connector.attempts();
    assert!(attempts[1] - attempts[0] >= Duration::from_secs(4));
    // The session never came up, so the application saw no loss
    assert_eq!(harness.sink.count(&SinkEvent::ConnectionLost), 0);
    assert_eq!(harness.sink.count(&SinkEvent::Connected), 1);
    assert_eq!(harness.client.health_metrics().reconnect_count, 0);
}

#[tokio::test]
async fn test_lost_session_reconnects_and_resends_in_flight() {
    let mut harness = Harness::new();
    let mut broker = harness.connect_and_accept(test_options()).await;

    let id = harness
        .client
        .publish("orders", "42", QoS::AtLeastOnce, false)
        .await
        .unwrap();
    match within(broker.expect_packet()).await.unwrap() {
        Packet::Publish(publish) => assert!(!publish.dup),
        other => panic!("expected PUBLISH, got {other:?}"),
    }

    // Broker vanishes before acknowledging
    broker.close();
    within(harness.sink.wait_for(SinkEvent::ConnectionLost, 1)).await;

    let mut broker = harness.next_broker().await;
    within(broker.accept()).await.unwrap();
    match within(broker.expect_packet()).await.unwrap() {
        Packet::Publish(publish) => {
            assert!(publish.dup);
            assert_eq!(publish.message_id, id);
            assert_eq!(publish.topic, "orders");
            assert_eq!(&publish.payload[..], b"42");
        }
        other => panic!("expected resent PUBLISH, got {other:?}"),
    }

    broker.send(Packet::Puback(id)).await.unwrap();
    within(harness.sink.wait_for(SinkEvent::PublishComplete(id), 1)).await;

    assert_eq!(harness.sink.count(&SinkEvent::Connected), 2);
    assert_eq!(harness.client.health_metrics().reconnect_count, 1);
    assert_eq!(harness.client.pending_message_count(), 0);
}

#[tokio::test]
async fn test_publish_before_connack_is_sent_once() {
    let mut harness = Harness::new();
    harness.client.connect(test_options()).await.unwrap();

    // Queued while the session is still waiting for CONNACK
    let id = harness
        .client
        .publish("early", "bird", QoS::AtLeastOnce, false)
        .await
        .unwrap();

    let mut broker = harness.next_broker().await;
    within(broker.accept()).await.unwrap();
    within(harness.sink.wait_for(SinkEvent::Connected, 1)).await;

    match within(broker.expect_packet()).await.unwrap() {
        Packet::Publish(publish) => {
            assert_eq!(publish.message_id, id);
            assert!(!publish.dup);
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
    let extra = tokio::time::timeout(Duration::from_millis(200), broker.expect_packet()).await;
    assert!(extra.is_err(), "unexpected second frame {extra:?}");

    broker.send(Packet::Puback(id)).await.unwrap();
    within(harness.sink.wait_for(SinkEvent::PublishComplete(id), 1)).await;
    assert_eq!(harness.client.pending_message_count(), 0);
}

#[tokio::test]
async fn test_qos2_resend_after_pubrec_is_pubrel() {
    let mut harness = Harness::new();
    let mut broker = harness.connect_and_accept(test_options()).await;

    let id = harness
        .client
        .publish("jobs", "run", QoS::ExactlyOnce, false)
        .await
        .unwrap();
    within(broker.expect_packet()).await.unwrap();
    broker.send(Packet::Pubrec(id)).await.unwrap();
    assert_eq!(
        within(broker.expect_packet()).await.unwrap(),
        Packet::Pubrel(id)
    );

    broker.close();
    let mut broker = harness.next_broker().await;
    within(broker.accept()).await.unwrap();

    // Only the release is repeated, never the PUBLISH
    assert_eq!(
        within(broker.expect_packet()).await.unwrap(),
        Packet::Pubrel(id)
    );
    broker.send(Packet::Pubcomp(id)).await.unwrap();
    within(harness.sink.wait_for(SinkEvent::PublishComplete(id), 1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_connack_is_not_retried() {
    let mut harness = Harness::new();
    harness.client.connect(test_options()).await.unwrap();

    let mut broker = harness.next_broker().await;
    broker
        .answer_connect(ConnackCode::NotAuthorized)
        .await
        .unwrap();

    let result = harness.client.wait_for_connection(VIRTUAL_WAIT).await;
    assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    within(harness.sink.wait_for(
        SinkEvent::Error("Connection Refused: not authorized".to_string()),
        1,
    ))
    .await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(harness.connector.attempt_count(), 1);
    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(harness.sink.count(&SinkEvent::ConnectionLost), 0);

    // Operations fail until the application connects again
    let publish = harness
        .client
        .publish("t", "x", QoS::AtMostOnce, false)
        .await;
    assert!(matches!(publish, Err(MqttError::NotConnected { .. })));
}

#[tokio::test]
async fn test_disconnect_sends_disconnect_once() {
    let mut harness = Harness::new();
    let mut broker = harness.connect_and_accept(test_options()).await;

    harness.client.disconnect().await.unwrap();
    assert_eq!(
        within(broker.expect_packet()).await.unwrap(),
        Packet::Disconnect
    );
    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);

    harness.client.disconnect().await.unwrap();
    assert_eq!(harness.sink.count(&SinkEvent::Disconnected), 1);
    assert_eq!(harness.sink.count(&SinkEvent::ConnectionLost), 0);
    assert_eq!(harness.connector.attempt_count(), 1);

    let subscribe = harness.client.subscribe("a/#", QoS::AtMostOnce).await;
    assert!(matches!(subscribe, Err(MqttError::NotConnected { .. })));
}

#[tokio::test]
async fn test_queued_frames_are_flushed_before_disconnect() {
    let mut harness = Harness::new();
    let mut broker = harness.connect_and_accept(test_options()).await;

    harness
        .client
        .publish("last/words", "bye", QoS::AtMostOnce, false)
        .await
        .unwrap();
    harness.client.disconnect().await.unwrap();

    match within(broker.expect_packet()).await.unwrap() {
        Packet::Publish(publish) => assert_eq!(publish.topic, "last/words"),
        other => panic!("expected PUBLISH, got {other:?}"),
    }
    assert_eq!(
        within(broker.expect_packet()).await.unwrap(),
        Packet::Disconnect
    );
}

#[tokio::test]
async fn test_connect_again_after_disconnect() {
    let mut harness = Harness::new();
    let broker = harness.connect_and_accept(test_options()).await;
    harness.client.disconnect().await.unwrap();
    drop(broker);

    let mut broker = harness.connect_and_accept(test_options()).await;
    assert!(harness.client.is_connected());
    assert_eq!(harness.sink.count(&SinkEvent::Connected), 2);

    // A new connect() is a fresh start, not a reconnect
    assert_eq!(harness.client.health_metrics().reconnect_count, 0);

    let id = harness
        .client
        .subscribe("again/#", QoS::AtMostOnce)
        .await
        .unwrap();
    match within(broker.expect_packet()).await.unwrap() {
        Packet::Subscribe(subscribe) => assert_eq!(subscribe.message_id, id),
        other => panic!("expected SUBSCRIBE, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_disconnect_is_reported() {
    let mut harness = Harness::new();
    let mut broker = harness.connect_and_accept(test_options()).await;

    broker.send(Packet::Disconnect).await.unwrap();
    within(harness.sink.wait_for(
        SinkEvent::Error("Server sent disconnect".to_string()),
        1,
    ))
    .await;

    broker.close();
    within(harness.sink.wait_for(SinkEvent::ConnectionLost, 1)).await;
    let mut broker = harness.next_broker().await;
    within(broker.accept()).await.unwrap();
    within(harness.sink.wait_for(SinkEvent::Connected, 2)).await;
}
