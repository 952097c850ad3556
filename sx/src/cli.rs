//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eyre::{Result, eyre};
use std::path::PathBuf;
use tracing::debug;

use crate::k5000::{DumpKind, MemoryArea};

/// sx - K5000 sysex request/response exchange
#[derive(Parser)]
#[command(
    name = "sx",
    about = "Send sysex dump requests and wait for the matching reply",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the reply headers recognised for a channel
    Headers {
        /// Sysex channel (0-15), defaults to the configured channel
        #[arg(long)]
        channel: Option<u8>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Classify a frame given as hex bytes (e.g. "F0 40 00 20 00 0A 00 00 F7")
    Classify {
        /// Sysex channel (0-15), defaults to the configured channel
        #[arg(long)]
        channel: Option<u8>,

        /// Frame bytes in hex
        #[arg(required = true, value_name = "HEX")]
        bytes: Vec<String>,
    },

    /// Run one request/response exchange against the simulated device
    Exchange {
        /// Memory area to request
        #[arg(short, long, value_enum, default_value = "single-a")]
        area: MemoryArea,

        /// Dump kind
        #[arg(short, long, value_enum, default_value = "one")]
        dump: DumpKind,

        /// Patch number 0-127 (one-patch dumps only)
        #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=127))]
        number: u8,

        /// Sysex channel (0-15), defaults to the configured channel
        #[arg(long)]
        channel: Option<u8>,

        /// Response deadline in milliseconds, defaults to the configured timeout
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Simulated reply delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Make the simulated device drop its reply
        #[arg(long)]
        drop: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Parse hex byte arguments into a frame
///
/// Accepts space- or comma-separated bytes, optional `0x` prefixes, and runs
/// of digits without separators ("F04000").
pub fn parse_hex_frame(args: &[String]) -> Result<Vec<u8>> {
    debug!(?args, "parse_hex_frame: called");
    let mut frame = Vec::new();
    for token in args.iter().flat_map(|arg| arg.split([' ', ',', ':'])) {
        let token = token.trim();
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if token.is_empty() {
            continue;
        }
        // from_str_radix alone would accept a sign prefix
        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!("Invalid hex byte in '{}'", token));
        }
        if token.len() % 2 != 0 && token.len() != 1 {
            return Err(eyre!("Odd number of hex digits in '{}'", token));
        }

        let digits = token.as_bytes();
        for chunk in digits.chunks(2) {
            let text = std::str::from_utf8(chunk).map_err(|_| eyre!("Invalid hex byte in '{}'", token))?;
            let byte = u8::from_str_radix(text, 16).map_err(|_| eyre!("Invalid hex byte '{}'", text))?;
            frame.push(byte);
        }
    }

    if frame.is_empty() {
        return Err(eyre!("No bytes given"));
    }
    debug!(len = frame.len(), "parse_hex_frame: parsed frame");
    Ok(frame)
}

/// Format bytes as space-separated uppercase hex
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sysexchange")
        .join("logs")
        .join("sysexchange.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Config is read from (first found):\n");
    help.push_str("  --config <PATH>\n");
    help.push_str("  ./.sysexchange.yml\n");
    if let Some(config_dir) = dirs::config_dir() {
        help.push_str(&format!(
            "  {}\n",
            config_dir.join("sysexchange").join("sysexchange.yml").display()
        ));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for command results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
