//! Mock implementations for testing
//!
//! [`RecordingSink`] captures every engine callback, [`MockConnector`] hands
//! the engine in-memory duplex pipes instead of sockets, and [`MockBroker`]
//! drives the server end of each pipe.

use crate::error::MqttError;
use crate::protocol::{read_packet, write_packet, CodecError, ConnackCode, Packet};
use crate::transport::mqtt::EventSink;
use crate::transport::{BoxedStream, Connector};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// Buffer size of each in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// One callback observed by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Error(String),
    Connected,
    Disconnected,
    ConnectionLost,
    MessageArrived { topic: String, payload: Vec<u8> },
    PublishComplete(u16),
}

/// Event sink that records callbacks in arrival order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    changed: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Message ids passed to `publish_complete`
    pub fn completed(&self) -> Vec<u16> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::PublishComplete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// `(topic, payload)` pairs passed to `message_arrived`
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::MessageArrived { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }

    /// Display text of every reported error
    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &SinkEvent) -> usize {
        self.events()
            .iter()
            .filter(|event| *event == wanted)
            .count()
    }

    /// Resolve once `predicate` holds for the recorded events
    pub async fn wait_until(&self, predicate: impl Fn(&[SinkEvent]) -> bool) {
        loop {
            let notified = self.changed.notified();
            if predicate(&self.events()) {
                return;
            }
            notified.await;
        }
    }

    /// Resolve once `wanted` has been recorded at least `times` times
    pub async fn wait_for(&self, wanted: SinkEvent, times: usize) {
        self.wait_until(|events| events.iter().filter(|event| **event == wanted).count() >= times)
            .await;
    }
}

impl EventSink for RecordingSink {
    fn error_occurred(&self, error: &MqttError) {
        self.record(SinkEvent::Error(error.to_string()));
    }

    fn on_connected(&self) {
        self.record(SinkEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.record(SinkEvent::Disconnected);
    }

    fn connection_lost(&self) {
        self.record(SinkEvent::ConnectionLost);
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        self.record(SinkEvent::MessageArrived {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    fn publish_complete(&self, message_id: u16) {
        self.record(SinkEvent::PublishComplete(message_id));
    }
}

/// Scripted result of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Fail with `ConnectionRefused`
    Fail,
    /// Hand out a fresh pipe
    Accept,
}

/// Connector that serves in-memory pipes according to a script
///
/// Attempts beyond the end of the script are accepted. The server end of
/// every accepted pipe arrives on the receiver returned by the constructor.
#[derive(Debug)]
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: Mutex<Vec<Instant>>,
    brokers: mpsc::UnboundedSender<MockBroker>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockBroker>) {
        Self::with_script(Vec::new())
    }

    pub fn with_script(
        script: Vec<ConnectOutcome>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockBroker>) {
        let (brokers, broker_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::new(Vec::new()),
            brokers,
        };
        (Arc::new(connector), broker_rx)
    }

    /// When each connection attempt was made
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        match outcome {
            ConnectOutcome::Fail => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("mock refused {host}:{port}"),
            )),
            ConnectOutcome::Accept => {
                let (client, server) = duplex(PIPE_CAPACITY);
                self.brokers
                    .send(MockBroker { stream: server })
                    .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "test dropped"))?;
                Ok(Box::new(client))
            }
        }
    }
}

/// Server end of one mock connection
#[derive(Debug)]
pub struct MockBroker {
    stream: DuplexStream,
}

impl MockBroker {
    /// Next packet the client wrote
    pub async fn expect_packet(&mut self) -> Result<Packet, CodecError> {
        read_packet(&mut self.stream).await
    }

    pub async fn send(&mut self, packet: Packet) -> Result<(), CodecError> {
        write_packet(&mut self.stream, &packet).await
    }

    /// Raw bytes, for framing error tests
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Read the client's CONNECT and answer with CONNACK 0
    pub async fn accept(&mut self) -> Result<Packet, CodecError> {
        self.answer_connect(ConnackCode::Accepted).await
    }

    /// Read the client's CONNECT and answer with `code`
    pub async fn answer_connect(&mut self, code: ConnackCode) -> Result<Packet, CodecError> {
        let connect = self.expect_packet().await?;
        self.send(Packet::Connack(code)).await?;
        Ok(connect)
    }

    /// Drop the server end, which the client sees as a transport failure
    pub fn close(self) {
        drop(self.stream);
    }
}
