use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ipcbridge_frame::{DataMessage, FrameConfig, FrameError, MessageReader, MessageWriter};
use ipcbridge_transport::{IpcStream, SocketListener};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, HubArgs};
use crate::exit::{frame_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_message, MessageRecord, OutputFormat};

type Clients = Arc<Mutex<Vec<(u64, MessageWriter<IpcStream>)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relay every message a client sends to all other connected clients.
pub fn run(args: HubArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let listener = SocketListener::bind(&args.path)
        .map_err(|err| transport_error("bind failed", err))?;
    let clients: Clients = Arc::new(Mutex::new(Vec::new()));
    let (events, relayed) = mpsc::channel::<(u64, DataMessage)>();

    {
        let clients = Arc::clone(&clients);
        std::thread::Builder::new()
            .name("ipcbridge-hub-accept".to_string())
            .spawn(move || accept_loop(&listener, &clients, &events))
            .map_err(|err| io_error("spawn failed", err))?;
    }

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let (client, message) = match relayed.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let record = MessageRecord::new("relayed", message.group, message.id, &message.payload)
            .with_source(client);
        print_message(&record, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

fn accept_loop(listener: &SocketListener, clients: &Clients, events: &Sender<(u64, DataMessage)>) {
    let next_id = AtomicU64::new(1);
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "accept failed");
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        };
        let client = next_id.fetch_add(1, Ordering::Relaxed);
        if let Some((uid, gid, pid)) = stream.peer_credentials() {
            info!(client, pid, uid, gid, "client connected");
        } else {
            info!(client, "client connected");
        }

        if let Err(err) = attach_client(client, stream, clients, events.clone()) {
            warn!(client, %err, "dropping client");
        }
    }
}

fn attach_client(
    client: u64,
    stream: IpcStream,
    clients: &Clients,
    events: Sender<(u64, DataMessage)>,
) -> CliResult<()> {
    let config = FrameConfig::default();
    let copy = stream
        .try_clone()
        .map_err(|err| transport_error("clone failed", err))?;
    let writer = MessageWriter::for_stream(copy, config.clone())
        .map_err(|err| frame_error("writer setup failed", err))?;
    let reader = MessageReader::for_stream(stream, config)
        .map_err(|err| frame_error("reader setup failed", err))?;
    lock(clients).push((client, writer));

    let clients = Arc::clone(clients);
    std::thread::Builder::new()
        .name(format!("ipcbridge-hub-{client}"))
        .spawn(move || {
            relay_loop(client, reader, &clients, &events);
            lock(&clients).retain(|(id, _)| *id != client);
            info!(client, "client disconnected");
        })
        .map_err(|err| io_error("spawn failed", err))?;
    Ok(())
}

fn relay_loop(
    client: u64,
    mut reader: MessageReader<IpcStream>,
    clients: &Clients,
    events: &Sender<(u64, DataMessage)>,
) {
    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(FrameError::ConnectionClosed) => return,
            Err(err) => {
                warn!(client, %err, "read failed");
                return;
            }
        };
        debug!(client, group = message.group, id = message.id, size = message.size(), "relaying");

        let mut peers = lock(clients);
        peers.retain_mut(|(peer, writer)| {
            if *peer == client {
                return true;
            }
            match writer.write_message(&message) {
                Ok(()) => true,
                Err(err) => {
                    warn!(client = *peer, %err, "dropping unreachable client");
                    false
                }
            }
        });
        drop(peers);

        if events.send((client, message)).is_err() {
            return;
        }
    }
}
