// perilink: interactive GATT peripheral console
//
// Runs the peripheral state machine against the in-process loopback host
// stack. Slash commands play the remote central; plain lines are notified to
// subscribers.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use perilink_core::gatt::AttributeRegistry;
use perilink_core::transport::{AttResult, LoopbackTransport};
use perilink_core::{
    start_peripheral, AdapterState, PeripheralError, PeripheralEvent, PeripheralHandle,
    PeripheralStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Remote id used when a slash command does not name one
const DEFAULT_REMOTE: &str = "central-1";

/// How long `/read` waits for the peripheral task to answer
const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "perilink")]
#[command(about = "perilink: BLE GATT peripheral console", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive peripheral session
    Run {
        /// Start with the adapter powered off
        #[arg(long)]
        powered_off: bool,
    },
    /// Show the service layout that would be published
    Info,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Restore defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Run { powered_off } => cmd_run(config, powered_off).await,
        Commands::Info => cmd_info(&config),
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else if config.list().iter().any(|(k, _)| *k == key) {
                println!("{} = {}", key.bright_cyan(), "(none)".dimmed());
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!(
                "  {} {}",
                "File:".dimmed(),
                config::Config::config_file()?.display()
            );
        }

        ConfigAction::Reset => {
            config::Config::default().save()?;
            println!("{} Configuration reset to defaults", "✓".green());
        }
    }

    Ok(())
}

fn cmd_info(config: &config::Config) -> Result<()> {
    let peripheral = &config.peripheral;
    peripheral
        .validate()
        .context("Configured peripheral settings are invalid")?;

    let service = AttributeRegistry::new(peripheral.service_uuid, peripheral.characteristic_uuid)
        .with_static_value(peripheral.read_value.as_ref().map(|v| v.as_bytes().to_vec()))
        .with_write_mode(peripheral.write_mode)
        .build_service();

    println!("{}", "Service Layout".bold());
    println!(
        "  Service:        {} ({})",
        service.uuid.to_string().bright_cyan(),
        if service.primary { "primary" } else { "secondary" }
    );
    for characteristic in &service.characteristics {
        println!(
            "  Characteristic: {}",
            characteristic.uuid.to_string().bright_yellow()
        );
        println!("    Properties:   {:?}", characteristic.properties);
        println!("    Permissions:  {:?}", characteristic.permissions);
        if let Some(value) = &characteristic.value {
            println!("    Static value: {} bytes", value.len());
        }
    }
    println!();
    let name = if peripheral.local_name.is_empty() {
        "(omitted)".dimmed().to_string()
    } else {
        peripheral.local_name.bright_green().to_string()
    };
    println!("  Advertised name: {}", name);

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn print_status(status: &PeripheralStatus) {
    println!("Adapter:     {}", status.adapter);
    println!("Advertising: {}", status.advertising);
    println!("Registered:  {}", status.registered);
    println!("Subscribers: {}", status.subscribers);
    println!(
        "Sent:        {} ({} failed, {} backpressure)",
        status.stats.notifications_sent,
        status.stats.notifications_failed,
        status.stats.backpressure_events
    );
    println!(
        "Received:    {} writes ({} undecodable), {} reads",
        status.stats.writes_received, status.stats.decode_failures, status.stats.reads_answered
    );
}

async fn cmd_run(config: config::Config, powered_off: bool) -> Result<()> {
    let peripheral_config = config.peripheral.clone();
    let characteristic_id = peripheral_config.characteristic_uuid;

    let (transport, transport_rx) = LoopbackTransport::new();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = start_peripheral(peripheral_config, transport.clone(), transport_rx, event_tx)
        .context("Failed to start peripheral")?;

    println!("{}", "perilink: Starting...".bold());
    println!();
    println!("Service:        {}", config.peripheral.service_uuid.to_string().bright_cyan());
    println!("Characteristic: {}", characteristic_id.to_string().bright_yellow());
    println!();
    println!("{}", "Commands:".bold());
    println!("  {}          notify subscribers", "<text>".bright_green());
    println!("  {} [remote]   remote subscribes", "/sub".bright_green());
    println!("  {} [remote] remote unsubscribes", "/unsub".bright_green());
    println!("  {} <text>   remote writes", "/write".bright_green());
    println!("  {} [offset]  remote reads", "/read".bright_green());
    println!("  {} on|off   adapter power", "/power".bright_green());
    println!("  {} | {}  advertising", "/advertise".bright_green(), "/stop".bright_green());
    println!("  {} | {}", "/status".bright_green(), "/quit".bright_green());
    println!();

    tracing::info!(
        "Peripheral session started (adapter {})",
        if powered_off { "off" } else { "on" }
    );
    if !powered_off {
        transport.power_on();
    }

    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PeripheralEvent::Inbound(text) => {
                    println!("\n{} {}", "←".bright_blue(), text);
                }
                PeripheralEvent::Status(message) => {
                    println!("\n{} {}", "•".dimmed(), message.dimmed());
                }
                PeripheralEvent::ReadyToSend => {
                    println!("\n{} Transport ready", "✓".green());
                }
            }
            prompt();
        }
    });

    let stdin_task = tokio::spawn(run_console(handle, transport));

    tokio::select! {
        _ = event_task => {}
        result = stdin_task => {
            result.context("Console task panicked")??;
        }
    }

    Ok(())
}

async fn run_console(handle: PeripheralHandle, transport: Arc<LoopbackTransport>) -> Result<()> {
    use tokio::io::AsyncBufReadExt;

    let characteristic_id = handle.characteristic_id();
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    prompt();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            prompt();
            continue;
        }

        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };
        let remote = if argument.is_empty() {
            DEFAULT_REMOTE
        } else {
            argument
        };

        match command {
            "/quit" | "/exit" => {
                println!("Shutting down...");
                let _ = handle.shutdown().await;
                break;
            }
            "/sub" => transport.subscribe(remote, characteristic_id),
            "/unsub" => transport.unsubscribe(remote, characteristic_id),
            "/write" => {
                transport.write(DEFAULT_REMOTE, characteristic_id, argument.as_bytes().to_vec())
            }
            "/read" => {
                let offset = if argument.is_empty() {
                    0
                } else {
                    match argument.parse() {
                        Ok(offset) => offset,
                        Err(_) => {
                            println!("Usage: /read [offset]");
                            prompt();
                            continue;
                        }
                    }
                };
                let request_id = transport.read(DEFAULT_REMOTE, characteristic_id, offset);
                match tokio::time::timeout(READ_TIMEOUT, transport.read_response(request_id)).await
                {
                    Ok(response) if response.result == AttResult::Success => println!(
                        "{} read {:?}",
                        "✓".green(),
                        String::from_utf8_lossy(&response.payload)
                    ),
                    Ok(response) => println!("{} read failed: {}", "✗".red(), response.result),
                    Err(_) => println!("{} no read response", "✗".red()),
                }
            }
            "/power" => match argument {
                "on" => transport.power_on(),
                "off" => transport.set_adapter_state(AdapterState::PoweredOff),
                _ => println!("Usage: /power on|off"),
            },
            "/advertise" => match handle.start_advertising().await {
                Ok(true) => println!("{} Advertising requested", "✓".green()),
                Ok(false) => println!("Already advertising"),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            "/stop" => match handle.stop_advertising().await {
                Ok(true) => {}
                Ok(false) => println!("Not advertising"),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            "/status" => match handle.status().await {
                Ok(status) => print_status(&status),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            _ if command.starts_with('/') => {
                println!("Try: /sub, /unsub, /write, /read, /power, /advertise, /stop, /status, /quit");
            }
            _ => match handle.send(line.as_bytes().to_vec()).await {
                Ok(count) => println!("{} {} ({} subscriber(s))", "→".bright_green(), line, count),
                Err(PeripheralError::NotRunning) => {
                    println!("{} Peripheral stopped", "✗".red());
                    break;
                }
                Err(e) => println!("{} {}", "✗".red(), e),
            },
        }

        prompt();
    }

    Ok(())
}
