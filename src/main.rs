//! detect-relay - Main Entry Point
//!
//! Keeps a broker session alive and relays detection tokens from a serial
//! device (or stdin) to it. Also offers one-shot publish, a listener for
//! inspecting traffic and a few serial line diagnostics.

use clap::{Parser, Subcommand, ValueEnum};
use detect_relay::bridge::{forward_lines, ForwardStats};
use detect_relay::config::{AppConfig, SerialSection};
use detect_relay::error::ClientResult;
use detect_relay::serial::{self, SerialError, TEST_TOKENS};
use detect_relay::observability::{init_default_logging, init_logging, logging, LogFormat};
use detect_relay::session::{LoggingHandler, MqttSession, SessionEvent};
use detect_relay::transport::mqtt::RumqttConnector;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};

/// How long to wait for the broker to accept a new session
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resilient MQTT relay for detection tokens
#[derive(Parser)]
#[command(name = "detect-relay")]
#[command(about = "Relay detection tokens from a serial source to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DETECT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and forward tokens from the serial device until interrupted
    Run {
        /// Read tokens from stdin instead of the configured device
        #[arg(long)]
        stdin: bool,
    },
    /// Publish a single message and exit
    Publish {
        /// Topic to publish to (defaults to the configured default topic)
        #[arg(short, long)]
        topic: Option<String>,
        /// Message payload
        #[arg(short, long)]
        message: String,
    },
    /// Print messages received on one or more topics
    Listen {
        /// Topic filter; repeat for several (defaults to the configured default topic)
        #[arg(short, long)]
        topic: Vec<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// List serial ports present on this machine
    Ports,
    /// Write sample detector output to a serial device
    SendTest {
        #[command(flatten)]
        line: LineArgs,
        /// Pause between tokens in milliseconds
        #[arg(long, default_value_t = serial::TEST_TOKEN_INTERVAL.as_millis() as u64)]
        interval_ms: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Overrides for the configured serial line
#[derive(clap::Args)]
struct LineArgs {
    /// Serial device (defaults to serial.device)
    #[arg(short, long)]
    device: Option<String>,
    /// Baud rate (defaults to serial.baud_rate)
    #[arg(short, long)]
    baud: Option<u32>,
}

impl LineArgs {
    fn apply(self, config: &AppConfig) -> SerialSection {
        let mut settings = config.serial.clone();
        if let Some(device) = self.device {
            settings.device = device;
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        settings
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

type AppSession = MqttSession<RumqttConnector>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    if let Err(e) = init_observability(cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting detect-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run { stdin } => run_relay(config, stdin).await,
        Commands::Publish { topic, message } => publish_once(config, topic, message).await,
        Commands::Listen { topic, format } => listen(config, topic, format).await,
        Commands::Ports => list_ports(),
        Commands::SendTest { line, interval_ms } => {
            send_test(line.apply(&config), Duration::from_millis(interval_ms)).await
        }
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let level = match verbose {
        0 => return Ok(init_default_logging()?),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".into()));
    let include_spans =
        logging::parse_spans_flag(&std::env::var("LOG_SPANS").unwrap_or_default());
    Ok(init_logging(level, format, include_spans)?)
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AppConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = vec!["detect-relay.toml", "config/detect-relay.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AppConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using built-in defaults");
            Ok(AppConfig::default())
        }
    }
}

fn build_session(config: &AppConfig) -> Result<AppSession, Box<dyn std::error::Error>> {
    let connector = RumqttConnector::new(config.connector_options());
    let session = MqttSession::new(config.session_config()?, connector);
    session.register_handler(Arc::new(LoggingHandler));
    Ok(session)
}

/// Connect and wait for the broker to accept the session
async fn establish(session: &AppSession) -> Result<(), Box<dyn std::error::Error>> {
    session.connect().await?;
    if let Err(e) = session.wait_until_connected(CONNECT_TIMEOUT).await {
        let _ = session.disconnect().await;
        return Err(e.into());
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<(), std::io::Error> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

async fn run_relay(config: AppConfig, use_stdin: bool) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(&config)?;

    // Registered now, sent as soon as the broker accepts the session
    register(&session, None).await?;
    establish(&session).await?;

    let topic = config.serial_topic().to_string();
    info!(topic = %topic, "Relay is running");

    let forwarding = forward_source(&config, &session, &topic, use_stdin);

    let outcome = tokio::select! {
        stats = forwarding => Some(stats),
        signal = shutdown_signal() => {
            signal?;
            None
        }
    };

    // Graceful shutdown
    info!("Application shutdown initiated");
    session.disconnect().await?;

    match outcome {
        Some(Ok(stats)) => {
            info!(
                lines_read = stats.lines_read,
                published = stats.published,
                failed = stats.failed,
                "Forwarding finished"
            );
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => Ok(()),
    }
}

/// Forward tokens from stdin or the configured device until end of input
async fn forward_source(
    config: &AppConfig,
    session: &AppSession,
    topic: &str,
    use_stdin: bool,
) -> ClientResult<ForwardStats> {
    if use_stdin {
        info!("Reading tokens from stdin");
        return forward_lines(BufReader::new(tokio::io::stdin()), session, Some(topic)).await;
    }

    info!(
        device = %config.serial.device,
        baud_rate = config.serial.baud_rate,
        "Reading tokens from serial device"
    );
    let port = serial::open(&config.serial)?;
    forward_lines(serial::spawn_reader(port)?, session, Some(topic)).await
}

async fn publish_once(
    config: AppConfig,
    topic: Option<String>,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(&config)?;
    establish(&session).await?;

    let result = session.publish(topic.as_deref(), message).await;
    session.disconnect().await?;

    let receipt = result?;
    info!(topic = %receipt.topic, bytes = receipt.payload_len, "Message published");
    Ok(())
}

async fn listen(
    config: AppConfig,
    topics: Vec<String>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(&config)?;
    let mut events = session.events();

    if topics.is_empty() {
        register(&session, None).await?;
    }
    for topic in &topics {
        register(&session, Some(topic)).await?;
    }
    establish(&session).await?;
    info!(topics = ?session.subscriptions().await, "Listening for messages");

    let printing = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Message(message)) => match format {
                    OutputFormat::Pretty => println!(
                        "[{}] {}: {}",
                        message.received_at.format("%H:%M:%S%.3f"),
                        message.topic,
                        String::from_utf8_lossy(&message.payload)
                    ),
                    OutputFormat::Json => match serde_json::to_string(&message) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("Failed to encode message: {}", e),
                    },
                },
                Ok(SessionEvent::DecodeError { topic, reason, payload }) => match format {
                    OutputFormat::Pretty => println!(
                        "[{}] {}: HEX {}",
                        chrono::Local::now().format("%H:%M:%S%.3f"),
                        topic,
                        serial::hex(&payload)
                    ),
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({
                            "topic": topic,
                            "error": reason,
                            "payload_hex": serial::hex(&payload),
                        })
                    ),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Listener fell behind, messages dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = printing => {}
        signal = shutdown_signal() => signal?,
    }

    session.disconnect().await?;
    Ok(())
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = serial::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{}: {}", port.port_name, serial::describe_port(port));
    }
    Ok(())
}

async fn send_test(settings: SerialSection, interval: Duration) -> Result<(), Box<dyn std::error::Error>> {
    info!(device = %settings.device, baud_rate = settings.baud_rate, "Sending test tokens");
    let sent = tokio::task::spawn_blocking(move || {
        let mut port = serial::open(&settings)?;
        Ok::<_, SerialError>(serial::write_tokens(&mut port, &TEST_TOKENS, interval)?)
    })
    .await??;

    info!(sent, "Test tokens sent");
    Ok(())
}

/// Subscribe before connecting; the subscription is sent once connected
async fn register(session: &AppSession, topic: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    match session.subscribe(topic).await {
        Err(e) if !e.is_not_connected() => Err(e.into()),
        _ => Ok(()),
    }
}

fn handle_config_command(config: AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
