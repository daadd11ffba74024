//! Framelink - command-line client
//!
//! Connects to a framelink server to watch incoming commands or to send
//! a single frame.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use framelink::config::{self, Config};
use framelink::protocol::{self, COMMAND_FIELD_SIZE, HEADER_SIZE};
use framelink::{Client, ClientEvent};

/// Framelink - command-tagged TCP frames
#[derive(Parser)]
#[command(name = "framelink")]
#[command(author = "Framelink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Talk to a framelink server from the command line", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log the commands the server sends
    Listen {
        /// Server host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Command to log when received (repeatable)
        #[arg(short, long = "watch")]
        watch: Vec<String>,
    },

    /// Connect, send one frame, disconnect
    Send {
        /// Command name
        command: String,

        /// UTF-8 payload
        #[arg(long, conflicts_with_all = ["hex", "with_id"])]
        text: Option<String>,

        /// Hex payload, e.g. 2a000000
        #[arg(long, conflicts_with = "with_id")]
        hex: Option<String>,

        /// Use the server-assigned id as payload
        #[arg(long)]
        with_id: bool,

        /// Wait this many ms for the server to assign an id before sending
        #[arg(long, default_value_t = 0)]
        wait_id_ms: u64,

        /// Server host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.general.log_filter.as_deref().unwrap_or("info"))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Listen { host, port, watch } => {
            run_listen(config, host, port, watch).await?;
        }
        Commands::Send {
            command,
            text,
            hex,
            with_id,
            wait_id_ms,
            host,
            port,
        } => {
            let payload = match (text, hex) {
                (Some(text), _) => Payload::Bytes(text.into_bytes()),
                (None, Some(hex)) => Payload::Bytes(parse_hex(&hex)?),
                (None, None) if with_id => Payload::OwnId,
                (None, None) => Payload::Bytes(Vec::new()),
            };
            run_send(config, host, port, &command, payload, wait_id_ms).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info(&config);
        }
    }

    Ok(())
}

/// What `send` should put in the payload
enum Payload {
    Bytes(Vec<u8>),
    OwnId,
}

/// Connect and log watched commands until Ctrl+C or disconnect
async fn run_listen(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    watch: Vec<String>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.network.host.clone());
    let port = port.unwrap_or(config.network.port);

    let mut client = Client::new(config.network.client_config());
    let mut event_rx = client
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    for command in watch {
        let name = command.clone();
        client.register(command, move |payload, sender| {
            tracing::info!(
                command = %name,
                sender,
                len = payload.len(),
                "Received {}",
                preview(payload)
            );
            Ok(())
        })?;
    }

    tracing::info!(
        "Connecting to {}:{} as '{}'",
        host,
        port,
        config.general.name
    );
    client.connect(&host, port).await?;

    println!("Listening on {}:{} (Ctrl+C to stop)", host, port);

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        tracing::info!("Connected to {}", server_addr);
                    }
                    ClientEvent::IdAssigned { id } => {
                        println!("Assigned client id {}", id);
                    }
                    ClientEvent::Disconnected { reason, stats } => {
                        println!(
                            "Disconnected: {} ({} frames, {} unknown, {} failed)",
                            reason,
                            stats.frames_received,
                            stats.unknown_commands,
                            stats.handler_failures
                        );
                        return Ok(());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Connect, send a single frame and disconnect
async fn run_send(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    command: &str,
    payload: Payload,
    wait_id_ms: u64,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.network.host.clone());
    let port = port.unwrap_or(config.network.port);

    let mut client = Client::new(config.network.client_config());
    let mut event_rx = client
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    client.connect(&host, port).await?;

    if wait_id_ms > 0 {
        let wait = tokio::time::timeout(Duration::from_millis(wait_id_ms), async {
            while let Some(event) = event_rx.recv().await {
                if let ClientEvent::IdAssigned { id } = event {
                    return Some(id);
                }
            }
            None
        });
        match wait.await {
            Ok(Some(id)) => tracing::info!("Server assigned id {}", id),
            _ => tracing::warn!("No id assigned within {} ms", wait_id_ms),
        }
    }

    match payload {
        Payload::Bytes(bytes) => client.send(command, &bytes).await?,
        Payload::OwnId => client.send_with_id(command).await?,
    }
    println!("Sent {} to {}:{}", command, host, port);

    client.disconnect().await?;
    Ok(())
}

/// Print protocol information
fn print_protocol_info(config: &Config) {
    println!("Framelink Protocol Information");
    println!("==============================\n");

    println!("Header: {} bytes", HEADER_SIZE);
    println!("  length prefix: 4 bytes, little-endian, counts the whole frame");
    println!("  command field: {} bytes, null-padded", COMMAND_FIELD_SIZE);
    println!(
        "Sender id field: {}",
        if config.network.include_sender_id {
            "enabled (4 bytes after command)"
        } else {
            "disabled"
        }
    );
    println!("Max frame size: {} bytes", config.network.max_frame_size);
    println!("Built-in command: {}", protocol::SET_ID_COMMAND);
    println!("\nDefault Port: {}", protocol::DEFAULT_PORT);
}

/// Parse a hex string such as "2a00 0000" into bytes
fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        anyhow::bail!("hex payload has an odd number of digits");
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16)
                .map_err(|e| anyhow::anyhow!("invalid hex byte {:?}: {}", text, e))
        })
        .collect()
}

/// Short printable view of a payload for log lines
fn preview(payload: &[u8]) -> String {
    const LIMIT: usize = 32;
    let shown = &payload[..payload.len().min(LIMIT)];
    let mut out: String = shown.iter().map(|b| format!("{:02x}", b)).collect();
    if payload.len() > LIMIT {
        out.push_str("..");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["framelink", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from([
            "framelink",
            "listen",
            "--watch",
            "spawn_entity",
            "--watch",
            "chat",
        ])
        .unwrap();
        match cli.command {
            Commands::Listen { watch, .. } => assert_eq!(watch, vec!["spawn_entity", "chat"]),
            _ => panic!("expected listen"),
        }
    }

    #[test]
    fn test_send_payload_flags_conflict() {
        let cli = Cli::try_parse_from([
            "framelink",
            "send",
            "load_world_server",
            "--with-id",
            "--hex",
            "2a000000",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("2a000000").unwrap(), vec![0x2A, 0, 0, 0]);
        assert_eq!(parse_hex("2A 00").unwrap(), vec![0x2A, 0]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(&[0x2A, 0x00]), "2a00");
        assert!(preview(&[0u8; 40]).ends_with(".."));
    }
}
