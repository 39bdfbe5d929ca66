//! mqttv3 - command line MQTT v3.1 client
//!
//! `mqttv3 sub` prints messages arriving on a topic filter, `mqttv3 pub`
//! publishes one message (optionally repeated) and waits for its handshakes.

use chrono::Utc;
use clap::{Parser, Subcommand};
use mqttv3::observability::init_default_logging;
use mqttv3::{ClientConfig, EventSink, MqttClient, MqttError, QoS};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How long to wait for the first CONNACK
const CONNECT_WAIT: Duration = Duration::from_secs(10);

/// How long `pub` waits for QoS 1/2 completions
const COMPLETION_WAIT: Duration = Duration::from_secs(30);

/// Command line MQTT v3.1 client
#[derive(Parser)]
#[command(name = "mqttv3")]
#[command(about = "Publish and subscribe over MQTT v3.1")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, overrides the configuration file
    #[arg(short, long, env = "MQTT_BROKER_URL")]
    broker: Option<String>,

    /// Client identifier, overrides the configuration file
    #[arg(short = 'i', long)]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print arriving messages
    Sub {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Publish a message
    Pub {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        #[arg(short, long)]
        retain: bool,
        /// Publish the message this many times
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
}

/// Engine callbacks forwarded to the command loop
#[derive(Debug)]
enum CliEvent {
    Connected,
    Lost,
    Message { topic: String, payload: Vec<u8> },
    Complete(u16),
    Error(String),
}

struct ChannelSink {
    events: mpsc::UnboundedSender<CliEvent>,
}

impl ChannelSink {
    fn forward(&self, event: CliEvent) {
        // Receiver only goes away while the process exits
        let _ = self.events.send(event);
    }
}

impl EventSink for ChannelSink {
    fn error_occurred(&self, error: &MqttError) {
        self.forward(CliEvent::Error(error.to_string()));
    }

    fn on_connected(&self) {
        self.forward(CliEvent::Connected);
    }

    fn on_disconnected(&self) {}

    fn connection_lost(&self) {
        self.forward(CliEvent::Lost);
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        self.forward(CliEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    fn publish_complete(&self, message_id: u16) {
        self.forward(CliEvent::Complete(message_id));
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink { events: events_tx });
    let client = match MqttClient::from_config(&config, sink) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid client settings: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Sub {
            topic,
            qos,
            json,
            count,
        } => run_sub(&client, &config, events_rx, &topic, qos, json, count).await,
        Commands::Pub {
            topic,
            message,
            qos,
            retain,
            repeat,
        } => run_pub(&client, &config, events_rx, &topic, &message, qos, retain, repeat).await,
    };

    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None => ClientConfig::for_broker("mqtt://localhost:1883"),
    };

    if let Some(broker) = &cli.broker {
        config.broker.url = broker.clone();
    }
    if let Some(client_id) = &cli.client_id {
        config.broker.client_id = Some(client_id.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn start(client: &MqttClient, config: &ClientConfig) -> Result<(), MqttError> {
    client.connect(config.connect_options()).await?;
    client.wait_for_connection(CONNECT_WAIT).await?;
    info!(
        client_id = client.client_id(),
        host = client.host(),
        port = client.port(),
        "Connected"
    );
    Ok(())
}

async fn run_sub(
    client: &MqttClient,
    config: &ClientConfig,
    mut events: mpsc::UnboundedReceiver<CliEvent>,
    topic: &str,
    qos: u8,
    json_output: bool,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    start(client, config).await?;
    client.subscribe(topic, qos).await?;

    let mut received = 0usize;
    let mut sessions = 0usize;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };

        match event {
            Some(CliEvent::Connected) => {
                sessions += 1;
                // The first CONNACK was consumed by wait_for_connection
                if sessions > 1 && config.session.clean_session {
                    client.subscribe(topic, qos).await?;
                }
            }
            Some(CliEvent::Message { topic, payload }) => {
                print_message(&topic, &payload, json_output);
                received += 1;
                if count.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            Some(CliEvent::Lost) => warn!("Connection lost, reconnecting"),
            Some(CliEvent::Error(message)) => warn!("{}", message),
            Some(CliEvent::Complete(_)) => {}
            None => break,
        }
    }
    Ok(())
}

fn print_message(topic: &str, payload: &[u8], json_output: bool) {
    if json_output {
        let line = json!({
            "topic": topic,
            "payload": String::from_utf8_lossy(payload),
            "received_at": Utc::now().to_rfc3339(),
        });
        println!("{line}");
    } else {
        println!("{topic} {}", String::from_utf8_lossy(payload));
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pub(
    client: &MqttClient,
    config: &ClientConfig,
    mut events: mpsc::UnboundedReceiver<CliEvent>,
    topic: &str,
    message: &str,
    qos: u8,
    retain: bool,
    repeat: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    start(client, config).await?;

    for _ in 0..repeat {
        let message_id = client
            .publish(topic, message.to_string(), qos, retain)
            .await?;
        info!(topic, message_id, "Published");
    }

    if qos == QoS::AtMostOnce {
        return Ok(());
    }

    let mut completed = 0usize;
    let waited = tokio::time::timeout(COMPLETION_WAIT, async {
        while completed < repeat {
            match events.recv().await {
                Some(CliEvent::Complete(_)) => completed += 1,
                Some(CliEvent::Error(message)) => warn!("{}", message),
                Some(_) => {}
                None => break,
            }
        }
    })
    .await;

    if waited.is_err() {
        return Err(format!("only {completed} of {repeat} publishes completed").into());
    }
    Ok(())
}
