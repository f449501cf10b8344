use std::fs;
use std::time::{Duration, Instant};

use ipcbridge_frame::DataMessage;
use ipcbridge_link::{LinkConfig, SocketTransport, Transport};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, link_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, MessageRecord, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let delay = args.delay.as_deref().map(parse_duration).transpose()?;
    let payload = resolve_payload(&args)?;

    let config = LinkConfig::from_env()
        .with_socket_path(&args.path)
        .with_reconnect_interval(Duration::from_millis(50));
    if payload.len() > config.frame.max_payload_size {
        return Err(CliError::new(
            crate::exit::DATA_INVALID,
            format!(
                "payload of {} bytes exceeds limit of {}",
                payload.len(),
                config.frame.max_payload_size
            ),
        ));
    }

    let transport = SocketTransport::start(config).map_err(|err| link_error("start failed", err))?;
    if !transport.wait_connected(connect_timeout) {
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "no IPC service at {} after {:?}",
                args.path.display(),
                connect_timeout
            ),
        ));
    }

    let message = DataMessage::copy_from(args.group, args.id, &payload);
    let record = match delay {
        None => {
            transport
                .try_send(&message)
                .map_err(|err| link_error("send failed", err))?;
            MessageRecord::new("sent", args.group, args.id, &payload)
        }
        Some(delay) => {
            transport.send_delayed(message, delay);
            wait_released(&transport, delay + connect_timeout)?;
            MessageRecord::new("scheduled", args.group, args.id, &payload)
                .with_delay_ms(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
        }
    };
    print_message(&record, format);

    Ok(SUCCESS)
}

fn wait_released(transport: &SocketTransport, limit: Duration) -> CliResult<()> {
    let start = Instant::now();
    while transport.pending_delayed() > 0 {
        if start.elapsed() >= limit {
            return Err(CliError::new(TIMEOUT, "delayed message was not released"));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    debug!(elapsed = ?start.elapsed(), "delayed message released");
    Ok(())
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return decode_hex(hex);
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "--hex needs an even number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| CliError::new(USAGE, format!("--hex is not valid hex: {input}")))
        })
        .collect()
}
