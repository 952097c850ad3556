//! sx - K5000 sysex request/response exchange
//!
//! CLI entry point for inspecting the reply table, classifying frames and
//! running exchanges against the simulated device.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, info};

use sysexchange::cli::{Cli, Command, OutputFormat, format_hex, generate_after_help, get_log_path, parse_hex_frame};
use sysexchange::config::Config;
use sysexchange::events::{ExchangeEvent, create_event_bus};
use sysexchange::exchange::SysexExchange;
use sysexchange::k5000::{self, Channel, DumpKind, DumpRequest, MemoryArea};
use sysexchange::transport::SimulatedDevice;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Headers { channel, format } => cmd_headers(&config, channel, format),
        Command::Classify { channel, bytes } => cmd_classify(&config, channel, &bytes),
        Command::Exchange {
            area,
            dump,
            number,
            channel,
            timeout_ms,
            delay_ms,
            drop,
            format,
        } => {
            let mut config = config;
            if let Some(channel) = channel {
                config.exchange.channel = channel;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.exchange.response_timeout_ms = timeout_ms;
            }
            if let Some(delay_ms) = delay_ms {
                config.simulator.reply_delay_ms = delay_ms;
            }
            if drop {
                config.simulator.drop_rate = 1.0;
            }
            cmd_exchange(&config, dump, area, number, format).await
        }
    }
}

fn resolve_channel(config: &Config, channel: Option<u8>) -> Result<Channel> {
    let channel = channel.unwrap_or(config.exchange.channel);
    Channel::new(channel).map_err(|e| eyre!(e))
}

/// List the reply headers for a channel
fn cmd_headers(config: &Config, channel: Option<u8>, format: OutputFormat) -> Result<()> {
    debug!(?channel, %format, "cmd_headers: called");
    let table = k5000::response_table(resolve_channel(config, channel)?);

    match format {
        OutputFormat::Json => {
            let headers: Vec<_> = table
                .iter()
                .map(|pattern| json!({ "label": pattern.label(), "bytes": format_hex(pattern.bytes()) }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&headers)?);
        }
        OutputFormat::Text => {
            for (index, pattern) in table.iter().enumerate() {
                println!("{:>2}  {:<16} {}", index, pattern.label().bold(), format_hex(pattern.bytes()));
            }
        }
    }
    Ok(())
}

/// Classify one frame against the reply table
fn cmd_classify(config: &Config, channel: Option<u8>, bytes: &[String]) -> Result<()> {
    debug!(?channel, "cmd_classify: called");
    let table = k5000::response_table(resolve_channel(config, channel)?);
    let frame = parse_hex_frame(bytes)?;

    match table.classify(&frame) {
        Some(pattern) => println!("{}", pattern.label()),
        None => println!("no match"),
    }
    Ok(())
}

/// Run one exchange against the simulated device
async fn cmd_exchange(
    config: &Config,
    dump: DumpKind,
    area: MemoryArea,
    number: u8,
    format: OutputFormat,
) -> Result<()> {
    debug!(?dump, ?area, number, %format, "cmd_exchange: called");
    let channel = resolve_channel(config, None)?;
    let request = match dump {
        DumpKind::One => DumpRequest::one(channel, area, number)?,
        DumpKind::Block => DumpRequest::block(channel, area),
    };

    let device = Arc::new(SimulatedDevice::new(config.simulator.clone(), Handle::current()));
    let bus = create_event_bus();
    let mut events = bus.subscribe();
    let exchange = SysexExchange::from_config(device, &config.exchange, bus.clone())
        .context("Failed to start exchange")?;

    let started = Instant::now();
    exchange
        .request(|| request.to_bytes())
        .context("Failed to send request")?;

    // The guard resolves every cycle, so the margin only covers a stalled runtime
    let wait = exchange.deadline() + Duration::from_secs(1);
    let event = tokio::time::timeout(wait, events.recv())
        .await
        .context("No exchange outcome published")?
        .context("Event bus closed")?;
    let elapsed = started.elapsed();
    let metrics = exchange.metrics();
    info!(event = event.event_type(), ?elapsed, "cmd_exchange: resolved");

    match format {
        OutputFormat::Json => {
            let output = json!({
                "event": event,
                "request": format_hex(&request.to_bytes()),
                "expected-header": request.response_header().label(),
                "elapsed-ms": elapsed.as_millis() as u64,
                "metrics": metrics,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("request   {}", format_hex(&request.to_bytes()));
            match event {
                ExchangeEvent::ResponseReceived => println!(
                    "{} {} after {}ms",
                    "received".green().bold(),
                    request.response_header().label(),
                    elapsed.as_millis()
                ),
                ExchangeEvent::ResponseTimedOut => println!(
                    "{} after {}ms",
                    "timed out".yellow().bold(),
                    elapsed.as_millis()
                ),
            }
        }
    }
    Ok(())
}
