use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod hub;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message to an IPC service.
    Send(SendArgs),
    /// Subscribe through the bridge and print delivered messages.
    Listen(ListenArgs),
    /// Run a minimal IPC service relaying messages between clients.
    Hub(HubArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Hub(args) => hub::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// IPC service socket.
    pub path: PathBuf,
    /// Message group.
    #[arg(long, short = 'g', value_parser = parse_byte)]
    pub group: u8,
    /// Message id within the group.
    #[arg(long, short = 'i', value_parser = parse_byte)]
    pub id: u8,
    /// UTF-8 payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex payload, e.g. 0a1b2c.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
    /// Deliver after this delay (e.g. 500ms, 2s).
    #[arg(long)]
    pub delay: Option<String>,
    /// Maximum time to wait for the service connection.
    #[arg(long, default_value = "3s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// IPC service socket.
    pub path: PathBuf,
    /// Number of subscribers to register.
    #[arg(long, default_value = "1")]
    pub subscribers: u32,
    /// Exit after N deliveries.
    #[arg(long)]
    pub count: Option<usize>,
    /// Cap for subscriber buffer growth, in bytes.
    #[arg(long)]
    pub max_buffer: Option<usize>,
}

#[derive(Args, Debug)]
pub struct HubArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after relaying N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Accepts decimal (`16`) or hex (`0x10`).
fn parse_byte(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse::<u8>(),
    };
    parsed.map_err(|_| format!("expected a byte (0-255 or 0x00-0xff), got {input:?}"))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_byte_accepts_decimal_and_hex() {
        assert_eq!(parse_byte("16"), Ok(16));
        assert_eq!(parse_byte("0x1f"), Ok(0x1f));
        assert_eq!(parse_byte("0XFF"), Ok(0xff));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0xzz").is_err());
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
