//! Throughput harness
//!
//! `mqtt-firehose publish` sends N messages of S bytes at R messages per
//! second and waits for every QoS 1/2 handshake; `mqtt-firehose listen`
//! counts arriving messages. Both print the elapsed time.

use clap::{Parser, Subcommand};
use mqttv3::observability::init_default_logging;
use mqttv3::{ConnectOptions, EventSink, MqttClient, MqttError, QoS};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Load generator and listener for MQTT v3.1 brokers
#[derive(Parser)]
#[command(name = "mqtt-firehose")]
#[command(about = "Measure MQTT publish and receive throughput")]
struct Cli {
    #[arg(short, long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker: String,

    #[arg(short = 'i', long)]
    client_id: Option<String>,

    /// Concurrent dispatch tasks (0 keeps arrival order)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a burst of messages
    Publish {
        #[arg(short, long)]
        topic: String,
        /// Number of messages
        #[arg(short = 'n', long, default_value_t = 1000)]
        count: usize,
        /// Payload size in bytes
        #[arg(short, long, default_value_t = 64)]
        size: usize,
        /// Messages per second, 0 for unthrottled
        #[arg(short, long, default_value_t = 0)]
        rate: u32,
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
    /// Count messages arriving on a topic filter
    Listen {
        #[arg(short, long)]
        topic: String,
        /// Stop after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
}

/// Counts deliveries and completions
#[derive(Default)]
struct CountingSink {
    received: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    changed: Notify,
}

impl CountingSink {
    async fn wait_for(&self, counter: &AtomicUsize, target: usize) {
        loop {
            let notified = self.changed.notified();
            if counter.load(Ordering::SeqCst) >= target {
                return;
            }
            notified.await;
        }
    }
}

impl EventSink for CountingSink {
    fn error_occurred(&self, error: &MqttError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        warn!("{}", error);
    }

    fn on_connected(&self) {
        info!("Session established");
    }

    fn on_disconnected(&self) {}

    fn connection_lost(&self) {
        warn!("Connection lost, reconnecting");
    }

    fn message_arrived(&self, _topic: &str, _payload: &[u8]) {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn publish_complete(&self, _message_id: u16) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let sink = Arc::new(CountingSink::default());
    let client = match MqttClient::new(&cli.broker, cli.client_id.as_deref(), sink.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid client settings: {}", e);
            process::exit(1);
        }
    };

    let options = ConnectOptions {
        dispatch_workers: cli.workers,
        ..ConnectOptions::default()
    };

    let result = match cli.command {
        Commands::Publish {
            topic,
            count,
            size,
            rate,
            qos,
        } => run_publish(&client, &sink, options, &topic, count, size, rate, qos).await,
        Commands::Listen { topic, count, qos } => {
            run_listen(&client, &sink, options, &topic, count, qos).await
        }
    };

    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    if let Err(e) = result {
        error!("Firehose failed: {}", e);
        process::exit(1);
    }
}

fn random_payload(size: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .collect()
}

fn report(label: &str, messages: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { messages as f64 / secs } else { 0.0 };
    println!("{label}: {messages} messages in {secs:.3}s ({rate:.1} msg/s)");
}

#[allow(clippy::too_many_arguments)]
async fn run_publish(
    client: &MqttClient,
    sink: &CountingSink,
    options: ConnectOptions,
    topic: &str,
    count: usize,
    size: usize,
    rate: u32,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    client.connect(options).await?;
    client.wait_for_connection(Duration::from_secs(10)).await?;

    let payload = random_payload(size);
    let mut pacer = (rate > 0).then(|| {
        let mut pacer = interval((Duration::from_secs(1) / rate).max(Duration::from_nanos(1)));
        pacer.set_missed_tick_behavior(MissedTickBehavior::Burst);
        pacer
    });

    let started = Instant::now();
    for _ in 0..count {
        if let Some(pacer) = pacer.as_mut() {
            pacer.tick().await;
        }
        client.publish(topic, payload.clone(), qos, false).await?;
    }
    report("queued", count, started.elapsed());

    if qos > QoS::AtMostOnce {
        sink.wait_for(&sink.completed, count).await;
        report("completed", count, started.elapsed());
    }

    let metrics = client.health_metrics();
    info!(
        reconnects = metrics.reconnect_count,
        pending = metrics.pending_messages,
        errors = sink.errors.load(Ordering::SeqCst),
        "Publish run finished"
    );
    Ok(())
}

async fn run_listen(
    client: &MqttClient,
    sink: &CountingSink,
    options: ConnectOptions,
    topic: &str,
    count: Option<usize>,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    client.connect(options).await?;
    client.wait_for_connection(Duration::from_secs(10)).await?;
    client.subscribe(topic, qos).await?;

    // Timing starts with the first message
    sink.wait_for(&sink.received, 1).await;
    let started = Instant::now();

    match count {
        Some(target) => sink.wait_for(&sink.received, target).await,
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
        }
    }

    report("received", sink.received.load(Ordering::SeqCst), started.elapsed());
    Ok(())
}
