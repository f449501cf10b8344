use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipcbridge_core::{Bridge, BridgeConfig, LocalRuntime, ReceiveError, SubscriberId};
use ipcbridge_link::{LinkConfig, SocketTransport};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_message, MessageRecord, OutputFormat};

struct Delivery {
    subscriber: u64,
    group: u8,
    id: u8,
    buffer: Vec<u8>,
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    if args.subscribers == 0 {
        return Err(CliError::new(USAGE, "--subscribers must be at least 1"));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let transport = SocketTransport::start(LinkConfig::from_env().with_socket_path(&args.path))
        .map_err(|err| link_error("start failed", err))?;
    let mut config = BridgeConfig::default();
    config.max_buffer_capacity = args.max_buffer;
    let bridge = Bridge::new(transport, config);
    bridge.init(LocalRuntime::new());
    let runtime = bridge
        .runtime()
        .ok_or_else(|| CliError::new(INTERNAL, "bridge runtime missing after init"))?;

    let (tx, rx) = mpsc::channel::<Delivery>();
    for slot in 0..u64::from(args.subscribers) {
        let tx = Mutex::new(tx.clone());
        let object = runtime.object(
            move |group: u8, id: u8, buffer: &[u8]| -> Result<(), ReceiveError> {
                let delivery = Delivery {
                    subscriber: slot,
                    group,
                    id,
                    buffer: buffer.to_vec(),
                };
                tx.lock()
                    .map_err(|_| "delivery channel poisoned")?
                    .send(delivery)?;
                Ok(())
            },
        );
        bridge
            .register(SubscriberId(slot), object)
            .map_err(|err| CliError::new(INTERNAL, format!("register failed: {err}")))?;
    }
    drop(tx);
    info!(
        socket = %args.path.display(),
        subscribers = args.subscribers,
        "listening"
    );

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let delivery = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(delivery) => delivery,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        // The subscriber sees its whole reusable buffer; trailing zeroes
        // past the message are not shown.
        let end = delivery
            .buffer
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |last| last + 1);
        let record = MessageRecord::new("delivered", delivery.group, delivery.id, &delivery.buffer[..end])
            .with_source(delivery.subscriber);
        print_message(&record, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    bridge.shutdown();
    Ok(SUCCESS)
}
