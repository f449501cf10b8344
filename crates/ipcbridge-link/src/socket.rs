use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ipcbridge_frame::{DataMessage, FrameError, MessageReader, MessageWriter};
use ipcbridge_transport::IpcStream;
use tracing::{debug, info, warn};

use crate::callbacks::CallbackSet;
use crate::config::LinkConfig;
use crate::delay::DelayQueue;
use crate::error::{LinkError, Result};
use crate::transport::{MessageCallback, Transport};

struct Shared {
    config: LinkConfig,
    callbacks: CallbackSet,
    running: AtomicBool,
    writer: Mutex<Option<MessageWriter<IpcStream>>>,
    // Clone of the session stream kept only to interrupt the blocking reader.
    control: Mutex<Option<IpcStream>>,
    connected: Mutex<bool>,
    connected_changed: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        *lock(&self.connected) = connected;
        self.connected_changed.notify_all();
    }

    fn try_send(&self, message: &DataMessage) -> Result<()> {
        let mut writer = lock(&self.writer);
        let Some(active) = writer.as_mut() else {
            return Err(LinkError::NotConnected(self.config.socket_path.clone()));
        };
        active.write_message(message)?;
        Ok(())
    }

    fn send(&self, message: &DataMessage) {
        if let Err(err) = self.try_send(message) {
            warn!(
                group = message.group,
                id = message.id,
                size = message.size(),
                %err,
                "dropping outbound message"
            );
        }
    }
}

/// Reconnecting client of the IPC service socket.
///
/// A background thread keeps a connection to [`LinkConfig::socket_path`],
/// retrying every [`LinkConfig::reconnect_interval`], and hands each inbound
/// message to the registered callbacks. Delayed sends are released by a
/// [`DelayQueue`] and go out on whatever connection is current at that time.
pub struct SocketTransport {
    shared: Arc<Shared>,
    delay: Option<DelayQueue>,
    worker: Option<JoinHandle<()>>,
}

impl SocketTransport {
    /// Spawn the connection and delay threads.
    ///
    /// Succeeds even if the service is not reachable yet.
    pub fn start(config: LinkConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            config,
            callbacks: CallbackSet::new(),
            running: AtomicBool::new(true),
            writer: Mutex::new(None),
            control: Mutex::new(None),
            connected: Mutex::new(false),
            connected_changed: Condvar::new(),
        });

        let sink_shared = Arc::clone(&shared);
        let delay = DelayQueue::start(move |message| sink_shared.send(&message))?;

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("ipcbridge-link".to_string())
            .spawn(move || run(&worker_shared))
            .map_err(|source| LinkError::Spawn {
                name: "ipcbridge-link",
                source,
            })?;

        Ok(Self {
            shared,
            delay: Some(delay),
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Send `message` now, reporting failure instead of logging it.
    pub fn try_send(&self, message: &DataMessage) -> Result<()> {
        self.shared.try_send(message)
    }

    pub fn is_connected(&self) -> bool {
        *lock(&self.shared.connected)
    }

    /// Block until connected or `timeout` elapses. Returns the final state.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut connected = lock(&self.shared.connected);
        while !*connected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            connected = self
                .shared
                .connected_changed
                .wait_timeout(connected, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *connected
    }

    /// Delayed messages not yet released.
    pub fn pending_delayed(&self) -> usize {
        self.delay.as_ref().map_or(0, DelayQueue::pending)
    }

    pub fn callback_count(&self) -> usize {
        self.shared.callbacks.len()
    }
}

impl Transport for SocketTransport {
    fn register_callback(&self, name: &str, callback: MessageCallback) {
        self.shared.callbacks.register(name, callback);
    }

    fn unregister_callback(&self, callback: &MessageCallback) {
        self.shared.callbacks.unregister(callback);
    }

    fn send(&self, message: DataMessage) {
        self.shared.send(&message);
    }

    fn send_delayed(&self, message: DataMessage, delay: Duration) {
        if let Some(queue) = &self.delay {
            queue.schedule(message, delay);
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        // Let an in-flight delayed send finish before the socket goes away.
        drop(self.delay.take());
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(control) = lock(&self.shared.control).as_ref() {
            let _ = control.shutdown();
        }
        if let Some(worker) = self.worker.take() {
            // Dropped from an inbound callback: the link thread stops by itself
            // once the callback returns.
            if worker.thread().id() == std::thread::current().id() {
                debug!("link dropped on its own thread; not joining");
                return;
            }
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

fn run(shared: &Shared) {
    let path = shared.config.socket_path.clone();
    let mut reported = false;

    while shared.is_running() {
        match ipcbridge_transport::connect(&path) {
            Ok(stream) => {
                reported = false;
                info!(path = %path.display(), "connected to ipc service");
                match session(shared, stream) {
                    Ok(()) => info!(path = %path.display(), "ipc service closed the connection"),
                    Err(err) => warn!(path = %path.display(), %err, "ipc session failed"),
                }
                *lock(&shared.writer) = None;
                *lock(&shared.control) = None;
                shared.set_connected(false);
            }
            Err(err) => {
                // Log the first failure of a streak only.
                if !reported {
                    debug!(path = %path.display(), %err, "ipc service unavailable; retrying");
                    reported = true;
                }
            }
        }

        if !shared.is_running() {
            break;
        }
        std::thread::park_timeout(shared.config.reconnect_interval);
    }
    debug!("link thread stopped");
}

fn session(shared: &Shared, stream: IpcStream) -> Result<()> {
    let frame = shared.config.frame.clone();
    let writer = MessageWriter::for_stream(stream.try_clone()?, frame.clone())?;
    let control = stream.try_clone()?;
    let mut reader = MessageReader::for_stream(stream, frame)?;

    *lock(&shared.writer) = Some(writer);
    *lock(&shared.control) = Some(control);
    // Drop may have run between connect and publishing the control handle.
    if !shared.is_running() {
        return Ok(());
    }
    shared.set_connected(true);

    loop {
        match reader.read_message() {
            Ok(message) => {
                shared.callbacks.emit(&message);
            }
            Err(err) if err.is_timeout() => {
                if !shared.is_running() {
                    return Ok(());
                }
            }
            Err(FrameError::ConnectionClosed) => return Ok(()),
            Err(err) => {
                if !shared.is_running() {
                    return Ok(());
                }
                return Err(err.into());
            }
        }
    }
}
