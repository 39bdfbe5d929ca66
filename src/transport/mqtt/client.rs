//! Impure I/O operations for the MQTT client
//!
//! [`MqttClient`] is the public facade. `connect()` spawns a connection
//! supervisor that owns the transport: it dials through the [`Connector`],
//! feeds a single writer task from the outbound queue, reads and routes
//! frames in arrival order, starts keep-alive once the broker accepts the
//! session and reconnects with backoff when the transport fails.

use super::callback::EventSink;
use super::connection::{
    parse_broker_url, resolve_client_id, BrokerAddress, ConnectOptions, ConnectionState,
};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::ids::IdAllocator;
use super::keep_alive::{run_keep_alive, ActivityTracker};
use super::message_handler::{Delivery, EventRoute, MessageHandler};
use super::qos::QosStateMachine;
use crate::config::{ClientConfig, ConfigError};
use crate::connection_span;
use crate::error::{MqttError, MqttResult};
use crate::protocol::{read_frame, write_packet, ConnackCode, Packet, QoS};
use crate::transport::{BoxedStream, Connector, TcpConnector};
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument};

/// Capacity of the outbound frame queue
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How long `disconnect()` waits for the supervisor to stop
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long the writer may spend flushing queued frames on shutdown
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared by the facade and the connection supervisor
struct Shared {
    client_id: String,
    address: BrokerAddress,
    sink: Arc<dyn EventSink>,
    connector: Arc<dyn Connector>,
    qos: QosStateMachine,
    ids: IdAllocator,
    state: watch::Sender<ConnectionState>,
    /// True between `connect()` and `disconnect()` or a refusal
    running: AtomicBool,
    reconnect_count: AtomicU32,
    /// Bumped for every transport the supervisor drives
    transport_generation: AtomicU64,
    connect_time: Mutex<Option<Instant>>,
}

impl Shared {
    fn transition(&self, event: ConnectionEvent) {
        let mut change = None;
        self.state.send_if_modified(|state| {
            let next = HealthMonitor::determine_next_state(state, &event);
            if next == *state {
                return false;
            }
            change = Some((*state, next));
            *state = next;
            true
        });

        if let Some((from, to)) = change {
            HealthMonitor::log_state_transition(&from, &to, &self.client_id);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_connect_time(&self, time: Option<Instant>) {
        *self
            .connect_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = time;
    }
}

/// Handles owned by one `connect()` call
struct Session {
    outbound: mpsc::Sender<Packet>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

/// MQTT v3.1 client
///
/// All operations take `&self`; share the client behind an `Arc` to publish
/// from several tasks.
pub struct MqttClient {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl MqttClient {
    /// Create a client for `broker_url` (`mqtt://host[:port]`) that connects
    /// over TCP. A missing client id is replaced by a random one.
    pub fn new(
        broker_url: &str,
        client_id: Option<&str>,
        sink: Arc<dyn EventSink>,
    ) -> MqttResult<Self> {
        Self::with_connector(broker_url, client_id, sink, Arc::new(TcpConnector))
    }

    /// Create a client that obtains its byte streams from `connector`
    pub fn with_connector(
        broker_url: &str,
        client_id: Option<&str>,
        sink: Arc<dyn EventSink>,
        connector: Arc<dyn Connector>,
    ) -> MqttResult<Self> {
        let address = parse_broker_url(broker_url)?;
        let client_id = resolve_client_id(client_id)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        debug!(client_id = %client_id, host = %address.host, port = address.port, "MQTT client created");

        Ok(Self {
            shared: Arc::new(Shared {
                client_id,
                address,
                sink,
                connector,
                qos: QosStateMachine::new(),
                ids: IdAllocator::new(),
                state,
                running: AtomicBool::new(false),
                reconnect_count: AtomicU32::new(0),
                transport_generation: AtomicU64::new(0),
                connect_time: Mutex::new(None),
            }),
            session: Mutex::new(None),
        })
    }

    /// Create a TCP client from a loaded configuration file
    pub fn from_config(config: &ClientConfig, sink: Arc<dyn EventSink>) -> MqttResult<Self> {
        Self::new(&config.broker.url, config.broker.client_id.as_deref(), sink)
    }

    /// Start connecting to the broker
    ///
    /// Returns once the connection supervisor is running; the session is
    /// established in the background and reported through
    /// [`EventSink::on_connected`]. Calling `connect()` while already running
    /// is a no-op.
    pub async fn connect(&self, options: ConnectOptions) -> MqttResult<()> {
        HealthMonitor::validate_reconnect_config(&options.reconnect)
            .map_err(|e| MqttError::Config(ConfigError::InvalidConfig(e)))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = session.as_ref() {
            if self.shared.is_running() && !existing.supervisor.is_finished() {
                debug!(client_id = %self.shared.client_id, "connect() called while already running");
                return Ok(());
            }
        }
        if let Some(stale) = session.take() {
            stale.supervisor.abort();
        }
        // The old writer queue goes away with the old session
        self.shared
            .qos
            .requeue_unsent(self.shared.transport_generation.load(Ordering::SeqCst));

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.transition(ConnectionEvent::ConnectRequested);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            shared: self.shared.clone(),
            dispatch_pool: (options.dispatch_workers > 0)
                .then(|| Arc::new(Semaphore::new(options.dispatch_workers))),
            options,
            outbound_tx: outbound_tx.clone(),
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
            shutdown_rx,
            activity: Arc::new(ActivityTracker::new()),
            generation: 0,
            has_connected: false,
        };

        let span = connection_span!(
            client_id = %self.shared.client_id,
            host = %self.shared.address.host,
            port = self.shared.address.port
        );
        let handle = tokio::spawn(supervisor.run().instrument(span));

        *session = Some(Session {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            supervisor: handle,
        });

        info!(
            client_id = %self.shared.client_id,
            host = %self.shared.address.host,
            port = self.shared.address.port,
            "MQTT connection supervisor started"
        );
        Ok(())
    }

    /// Wait until the broker accepts the session
    ///
    /// Fails if the client stops running (for example after a refused
    /// CONNECT) or the timeout elapses first.
    pub async fn wait_for_connection(&self, timeout: Duration) -> MqttResult<()> {
        let mut state_rx = self.shared.state.subscribe();
        let shared = &self.shared;

        let result = tokio::time::timeout(timeout, async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected if !shared.is_running() => {
                        return Err(MqttError::NotConnected { state });
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ChannelClosed);
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::NotConnected {
                state: self.connection_state(),
            }),
        }
    }

    /// Send DISCONNECT, close the transport and stop all timers
    ///
    /// Idempotent: calling it while already disconnected does nothing.
    pub async fn disconnect(&self) -> MqttResult<()> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);

        let Some(mut session) = session else {
            debug!(client_id = %self.shared.client_id, "disconnect() while not connected");
            return Ok(());
        };
        if !was_running {
            // Supervisor already stopped on its own (refused CONNECT)
            session.supervisor.abort();
            return Ok(());
        }

        let was_connected = self.connection_state() == ConnectionState::Connected;
        self.shared.transition(ConnectionEvent::DisconnectRequested);

        if was_connected && session.outbound.try_send(Packet::Disconnect).is_err() {
            warn!("Outbound queue unavailable, closing without DISCONNECT");
        }
        let _ = session.shutdown.send(true);

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut session.supervisor).await {
            Ok(Ok(())) => debug!("Connection supervisor shut down gracefully"),
            Ok(Err(e)) => warn!("Connection supervisor ended with error: {}", e),
            Err(_) => {
                warn!("Connection supervisor didn't shut down gracefully, aborting");
                session.supervisor.abort();
            }
        }

        self.shared.set_connect_time(None);
        self.shared.transition(ConnectionEvent::DisconnectCompleted);
        self.shared.sink.on_disconnected();
        Ok(())
    }

    /// Publish `payload` on `topic`
    ///
    /// Returns the message id once the frame is queued: 0 for QoS 0, an
    /// allocated id otherwise. Completion of QoS 1 and 2 publishes is
    /// reported through [`EventSink::publish_complete`].
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> MqttResult<u16> {
        let outbound = self.outbound_queue()?;
        let message_id = match qos {
            QoS::AtMostOnce => 0,
            _ => self.allocate_id(),
        };

        let packet = self
            .shared
            .qos
            .track_publish(message_id, topic, payload.into(), qos, retain);
        self.enqueue(&outbound, packet, message_id).await?;

        debug!(topic, message_id, ?qos, retain, "PUBLISH queued");
        Ok(message_id)
    }

    /// Subscribe to `topic_pattern`; returns once the SUBSCRIBE is queued
    pub async fn subscribe(&self, topic_pattern: &str, qos: QoS) -> MqttResult<u16> {
        let outbound = self.outbound_queue()?;
        let message_id = self.allocate_id();

        let packet = self.shared.qos.track_subscribe(message_id, topic_pattern, qos);
        self.enqueue(&outbound, packet, message_id).await?;

        info!(topic = topic_pattern, message_id, ?qos, "SUBSCRIBE queued");
        Ok(message_id)
    }

    /// Unsubscribe from `topic_pattern`; returns once the UNSUBSCRIBE is queued
    pub async fn unsubscribe(&self, topic_pattern: &str) -> MqttResult<u16> {
        let outbound = self.outbound_queue()?;
        let message_id = self.allocate_id();

        let packet = self.shared.qos.track_unsubscribe(message_id, topic_pattern);
        self.enqueue(&outbound, packet, message_id).await?;

        info!(topic = topic_pattern, message_id, "UNSUBSCRIBE queued");
        Ok(message_id)
    }

    pub fn host(&self) -> &str {
        &self.shared.address.host
    }

    pub fn port(&self) -> u16 {
        self.shared.address.port
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// In-flight messages across both delivery stores
    pub fn pending_message_count(&self) -> usize {
        self.shared.qos.pending_count()
    }

    /// Outbound and inbound delivery state
    pub fn qos_state(&self) -> &QosStateMachine {
        &self.shared.qos
    }

    /// Get health metrics for the connection
    pub fn health_metrics(&self) -> HealthMetrics {
        let connect_time = *self
            .shared
            .connect_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        HealthMonitor::calculate_health_metrics(
            connect_time,
            self.shared.reconnect_count.load(Ordering::SeqCst),
            self.shared.qos.pending_count(),
        )
    }

    fn allocate_id(&self) -> u16 {
        let outbound = self.shared.qos.outbound();
        self.shared.ids.next_free(|id| outbound.contains(id))
    }

    /// Queue sender of the running session
    fn outbound_queue(&self) -> MqttResult<mpsc::Sender<Packet>> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(session) if self.shared.is_running() => Ok(session.outbound.clone()),
            _ => Err(MqttError::NotConnected {
                state: self.connection_state(),
            }),
        }
    }

    async fn enqueue(
        &self,
        outbound: &mpsc::Sender<Packet>,
        packet: Packet,
        message_id: u16,
    ) -> MqttResult<()> {
        if outbound.send(packet).await.is_err() {
            if message_id != 0 {
                self.shared.qos.outbound().delete(message_id);
            }
            return Err(MqttError::ChannelClosed);
        }
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);

        // Background tasks cannot outlive the client; call disconnect() for a
        // clean DISCONNECT
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            let _ = session.shutdown.send(true);
            session.supervisor.abort();
        }
    }
}

/// Why one transport connection ended
#[derive(Debug)]
enum SessionEnd {
    /// `disconnect()` or the client was dropped
    Shutdown,
    /// Broker answered CONNECT with a non-zero code
    Refused(ConnackCode),
    /// Transport or keep-alive failure; `established` when CONNACK 0 arrived
    Lost { error: MqttError, established: bool },
}

/// Result of a task running alongside the reader
enum TaskExit {
    Writer(MqttResult<()>),
    KeepAlive(MqttError),
}

/// Owns the transport for one `connect()` call
struct Supervisor {
    shared: Arc<Shared>,
    options: ConnectOptions,
    outbound_tx: mpsc::Sender<Packet>,
    /// Locked by the writer of the current transport
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Packet>>>,
    shutdown_rx: watch::Receiver<bool>,
    activity: Arc<ActivityTracker>,
    dispatch_pool: Option<Arc<Semaphore>>,
    /// Generation of the transport currently driven
    generation: u64,
    has_connected: bool,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempts = 0u32;

        loop {
            let shutdown_requested = *self.shutdown_rx.borrow() || !self.shared.is_running();
            let delay = match HealthMonitor::should_attempt_reconnection(
                attempts,
                &self.options.reconnect,
                shutdown_requested,
            ) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    if !delay.is_zero() {
                        info!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Waiting before connection attempt"
                        );
                    }
                    delay
                }
                ReconnectionDecision::AbortShutdownRequested => break,
            };

            if !delay.is_zero() && !interruptible_sleep(self.shutdown_rx.clone(), delay).await {
                break;
            }

            self.shared.transition(ConnectionEvent::ConnectRequested);
            let address = &self.shared.address;
            let stream = tokio::select! {
                result = self.shared.connector.connect(&address.host, address.port) => result,
                _ = wait_for_shutdown(self.shutdown_rx.clone()) => break,
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    warn!(attempt = attempts, error = %e, "Transport connection failed");
                    self.shared
                        .transition(ConnectionEvent::TransportLost(e.to_string()));
                    self.shared.sink.error_occurred(&MqttError::Io(e));
                    continue;
                }
            };
            self.shared.transition(ConnectionEvent::TransportEstablished);

            match self.run_connection(stream).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Refused(code) => {
                    self.shared.running.store(false, Ordering::SeqCst);
                    HealthMonitor::log_refusal(code, &self.shared.client_id);
                    self.shared
                        .transition(ConnectionEvent::ConnAckRefused(code));
                    self.shared
                        .sink
                        .error_occurred(&MqttError::ConnectionRefused(code));
                    break;
                }
                SessionEnd::Lost { error, established } => {
                    // Failures caused by disconnect() are not connection loss
                    if *self.shutdown_rx.borrow() || !self.shared.is_running() {
                        break;
                    }

                    self.shared.set_connect_time(None);
                    self.shared
                        .transition(ConnectionEvent::TransportLost(error.to_string()));
                    self.shared.sink.error_occurred(&error);

                    if established {
                        self.shared.sink.connection_lost();
                        attempts = 0;
                    } else {
                        attempts = attempts.saturating_add(1);
                    }
                }
            }
        }

        debug!("Connection supervisor stopped");
    }

    /// Drive one transport from CONNECT until it ends
    async fn run_connection(&mut self, stream: BoxedStream) -> SessionEnd {
        let (mut reader, mut writer) = tokio::io::split(stream);
        self.activity.reset();
        self.generation = self.shared.transport_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let connect = Packet::Connect(self.options.build_connect_packet(&self.shared.client_id));
        if let Err(e) = write_packet(&mut writer, &connect).await {
            return SessionEnd::Lost {
                error: e.into(),
                established: false,
            };
        }
        self.activity.touch();
        debug!("CONNECT sent, waiting for CONNACK");

        let (stop_tx, stop_rx) = oneshot::channel();
        let mut tasks = JoinSet::new();
        let output = WriterOutput {
            writer,
            shared: self.shared.clone(),
            activity: self.activity.clone(),
            generation: self.generation,
        };
        let queue = self.outbound_rx.clone();
        tasks.spawn(async move { TaskExit::Writer(run_writer(output, queue, stop_rx).await) });

        let mut keep_alive = None;
        let mut established = false;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut writer_running = true;

        let end = loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break SessionEnd::Shutdown;
                    }
                }
                Some(exit) = tasks.join_next() => match exit {
                    Ok(TaskExit::Writer(Ok(()))) => {
                        writer_running = false;
                        break SessionEnd::Shutdown;
                    }
                    Ok(TaskExit::Writer(Err(error))) => {
                        writer_running = false;
                        break SessionEnd::Lost { error, established };
                    }
                    Ok(TaskExit::KeepAlive(error)) => break SessionEnd::Lost { error, established },
                    Err(e) => {
                        break SessionEnd::Lost {
                            error: MqttError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())),
                            established,
                        };
                    }
                },
                frame = read_frame(&mut reader) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(error) => break SessionEnd::Lost { error: error.into(), established },
                    };
                    self.activity.touch();

                    let packet = match frame.decode() {
                        Ok(packet) => packet,
                        Err(error) => {
                            warn!(error = %error, "Discarding malformed frame");
                            self.shared.sink.error_occurred(&error.into());
                            continue;
                        }
                    };

                    match MessageHandler::route_packet(packet) {
                        EventRoute::ConnectionAcknowledged => {
                            if established {
                                debug!("Ignoring repeated CONNACK");
                                continue;
                            }
                            established = true;
                            if let Some(interval) = self.options.keep_alive() {
                                let activity = self.activity.clone();
                                let outbound = self.outbound_tx.clone();
                                keep_alive = Some(tasks.spawn(async move {
                                    TaskExit::KeepAlive(run_keep_alive(activity, interval, outbound).await)
                                }));
                            }
                            self.on_session_accepted().await;
                        }
                        EventRoute::ConnectionRefused(code) => break SessionEnd::Refused(code),
                        EventRoute::PingResponse => {
                            debug!("PINGRESP received");
                            self.activity.pong_received();
                        }
                        EventRoute::ServerDisconnect => {
                            warn!("Broker sent DISCONNECT");
                            self.shared.sink.error_occurred(&MqttError::ServerDisconnect);
                        }
                        EventRoute::Delivery(delivery) => self.dispatch(delivery).await,
                        EventRoute::Unexpected(packet_type) => {
                            MessageHandler::log_unexpected(packet_type);
                        }
                    }
                }
            }
        };

        if let Some(handle) = keep_alive {
            handle.abort();
        }
        if writer_running && matches!(end, SessionEnd::Shutdown) {
            let _ = stop_tx.send(());
            let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, async {
                while let Some(exit) = tasks.join_next().await {
                    if let Ok(TaskExit::Writer(_)) = exit {
                        break;
                    }
                }
            })
            .await;
            if drained.is_err() {
                warn!("Writer did not drain the outbound queue in time");
            }
        }
        tasks.shutdown().await;

        end
    }

    /// CONNACK 0: mark the session up and resend unfinished handshakes
    async fn on_session_accepted(&mut self) {
        self.shared.transition(ConnectionEvent::ConnAckAccepted);
        self.shared.set_connect_time(Some(Instant::now()));

        if self.has_connected {
            let reconnect_count = self.shared.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
            info!(reconnect_count, "MQTT session re-established");
        }
        self.has_connected = true;

        let resend = self.shared.qos.pending_retransmissions(self.generation);
        if !resend.is_empty() {
            info!(count = resend.len(), "Resending in-flight messages");
        }
        for packet in resend {
            if self.outbound_tx.send(packet).await.is_err() {
                warn!("Outbound queue closed during resend");
                break;
            }
        }

        self.shared.sink.on_connected();
    }

    /// Run a delivery inline or on the dispatch pool
    async fn dispatch(&self, delivery: Delivery) {
        let Some(pool) = &self.dispatch_pool else {
            if let Some(reply) = handle_delivery(&self.shared.qos, delivery, self.shared.sink.as_ref()) {
                if self.outbound_tx.send(reply).await.is_err() {
                    debug!("Outbound queue closed, dropping acknowledgment");
                }
            }
            return;
        };

        let Ok(permit) = pool.clone().acquire_owned().await else {
            return;
        };
        let shared = self.shared.clone();
        let outbound = self.outbound_tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Some(reply) = handle_delivery(&shared.qos, delivery, shared.sink.as_ref()) {
                if outbound.send(reply).await.is_err() {
                    debug!("Outbound queue closed, dropping acknowledgment");
                }
            }
        });
    }
}

/// Apply one delivery to the QoS state machine
fn handle_delivery(
    qos: &QosStateMachine,
    delivery: Delivery,
    sink: &dyn EventSink,
) -> Option<Packet> {
    match delivery {
        Delivery::Publish(publish) => qos.on_publish(publish, sink),
        Delivery::Puback(id) => qos.on_puback(id, sink),
        Delivery::Pubrec(id) => qos.on_pubrec(id),
        Delivery::Pubrel(id) => qos.on_pubrel(id, sink),
        Delivery::Pubcomp(id) => qos.on_pubcomp(id, sink),
        Delivery::Suback(suback) => qos.on_suback(&suback, sink),
        Delivery::Unsuback(id) => qos.on_unsuback(id),
    }
}

/// Write side of one transport
struct WriterOutput {
    writer: WriteHalf<BoxedStream>,
    shared: Arc<Shared>,
    activity: Arc<ActivityTracker>,
    generation: u64,
}

/// Single writer for one transport
///
/// Every frame is stamped with the transport generation before it is written,
/// so a frame whose write fails is still resent by the next session. Exits
/// after writing DISCONNECT, or once `stop` fires and the queue is empty.
async fn run_writer(
    output: WriterOutput,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Packet>>>,
    mut stop: oneshot::Receiver<()>,
) -> MqttResult<()> {
    let WriterOutput {
        mut writer,
        shared,
        activity,
        generation,
    } = output;
    let mut queue = queue.lock().await;

    loop {
        let packet = tokio::select! {
            biased;
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
            _ = &mut stop => break,
        };

        shared.qos.mark_sent(&packet, generation);
        write_packet(&mut writer, &packet).await?;
        activity.touch();

        if packet == Packet::Disconnect {
            debug!("DISCONNECT sent");
            break;
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Resolve once shutdown is signalled or the client is gone
async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
