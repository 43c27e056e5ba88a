//! remote-event-mqtt command line
//!
//! Monitor remote events on a broker, publish one event, or validate a
//! configuration file.

use clap::{Parser, Subcommand};
use remote_event_mqtt::config::ClientConfig;
use remote_event_mqtt::observability::init_default_logging;
use remote_event_mqtt::{
    BrokerInfo, ChannelForwarder, EventAdminClient, HandlerEvent, Priority, QoS,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_FILE: &str = "remote-event-mqtt.toml";

/// MQTT remote event client
#[derive(Parser)]
#[command(name = "remote-event-mqtt")]
#[command(about = "Exchange event-admin events through an MQTT v5 broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, in addition to those in the configuration (repeatable)
    #[arg(long = "broker", value_name = "URL")]
    brokers: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print received events as JSON lines until interrupted
    Monitor {
        /// Topic pattern; a trailing `*` matches every subtopic
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,

        /// Subscription QoS
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
    /// Publish one event
    Publish {
        #[arg(long)]
        topic: String,

        #[arg(long, default_value = "")]
        payload: String,

        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,

        /// low, middle or high (asynchronous publishes only)
        #[arg(long, default_value = "middle")]
        priority: Priority,

        /// Wait for the broker acknowledgement
        #[arg(long)]
        sync: bool,

        /// Time allowed for connecting and delivery
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Monitor { topics, qos } => run_monitor(&config, &cli.brokers, &topics, qos),
        Commands::Publish {
            topic,
            payload,
            qos,
            priority,
            sync,
            timeout_ms,
        } => run_publish(
            &config,
            &cli.brokers,
            PublishRequest {
                topic,
                payload,
                qos: to_qos(qos),
                priority,
                sync,
                timeout: Duration::from_millis(timeout_ms),
            },
        ),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_FILE);
            Ok(ClientConfig::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?)
        }
        None => Ok(ClientConfig::default()),
    }
}

fn to_qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Start an rumqttc-backed client and hand it every known broker
fn start_client(
    config: &ClientConfig,
    extra_brokers: &[String],
) -> Result<(EventAdminClient, Receiver<HandlerEvent>), Box<dyn std::error::Error>> {
    let mut brokers = config.static_brokers()?;
    for url in extra_brokers {
        brokers.push(BrokerInfo::from_url(url)?);
    }
    if brokers.is_empty() {
        return Err("no broker configured, pass --broker mqtt://host:port".into());
    }

    let (forwarder, events) = ChannelForwarder::channel();
    let client = EventAdminClient::with_mqtt(config, Arc::new(forwarder))?;
    for (service_id, broker) in (0..).zip(&brokers) {
        client.add_broker_info(service_id, &broker.host, broker.port)?;
    }
    Ok((client, events))
}

fn run_monitor(
    config: &ClientConfig,
    brokers: &[String],
    topics: &[String],
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let (client, events) = start_client(config, brokers)?;
    for topic in topics {
        client.subscribe(topic, to_qos(qos))?;
    }
    info!(client_id = client.client_id(), "Monitoring remote events");

    while !stop.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(HandlerEvent::Received(message)) => {
                let line = json!({
                    "topic": message.topic,
                    "payload": String::from_utf8_lossy(&message.payload),
                    "bytes": message.payload.len(),
                });
                println!("{line}");
            }
            Ok(HandlerEvent::Connected) => info!("Connected, subscriptions active"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Shutting down monitor");
    client.shutdown();
    Ok(())
}

struct PublishRequest {
    topic: String,
    payload: String,
    qos: QoS,
    priority: Priority,
    sync: bool,
    timeout: Duration,
}

fn run_publish(
    config: &ClientConfig,
    brokers: &[String],
    request: PublishRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = Instant::now() + request.timeout;
    let (client, events) = start_client(config, brokers)?;
    wait_for_connection(&events, deadline)?;

    let payload = request.payload.as_bytes();
    if request.sync {
        let remaining = deadline.saturating_duration_since(Instant::now());
        client.publish_sync(&request.topic, payload, request.qos, None, remaining)?;
    } else {
        client.publish_async(&request.topic, payload, request.qos, None, request.priority)?;
        // give queued and in-flight messages a chance to leave before disconnecting
        while Instant::now() < deadline {
            let stats = client.stats();
            if stats.waiting == 0 && stats.publishing == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let stats = client.stats();
        if stats.waiting + stats.publishing > 0 {
            warn!(?stats, "Message still pending at shutdown");
        }
    }

    println!(
        "{}",
        json!({ "topic": request.topic, "qos": request.qos as u8, "sync": request.sync, "status": "sent" })
    );
    client.shutdown();
    Ok(())
}

fn wait_for_connection(
    events: &Receiver<HandlerEvent>,
    deadline: Instant,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(HandlerEvent::Connected) => return Ok(()),
            Ok(HandlerEvent::Received(_)) => {}
            Err(_) => return Err("timed out connecting to broker".into()),
        }
    }
}

fn handle_config_command(config: &ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
