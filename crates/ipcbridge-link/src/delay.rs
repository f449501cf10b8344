use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ipcbridge_frame::DataMessage;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

/// Upper bound for a single delay; longer requests are clamped.
const MAX_DELAY: Duration = Duration::from_secs(86_400 * 365);

struct Request {
    due: Instant,
    message: DataMessage,
}

struct Scheduled {
    due: Instant,
    seq: u64,
    message: DataMessage,
}

// BinaryHeap is a max-heap; invert so the earliest deadline (then the
// earliest submission) is on top.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

/// Timer releasing messages to a sink once their delay has elapsed.
///
/// Backed by a current-thread tokio runtime on its own thread. Messages with
/// equal deadlines are released in submission order. Messages still pending
/// when the queue is dropped are discarded.
pub struct DelayQueue {
    requests: UnboundedSender<Request>,
    pending: Arc<AtomicUsize>,
    stop: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl DelayQueue {
    /// Spawn the timer thread; `sink` runs on it for every due message.
    pub fn start(sink: impl Fn(DataMessage) + Send + 'static) -> Result<Self> {
        let spawn_err = |source| LinkError::Spawn {
            name: "ipcbridge-delay",
            source,
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(spawn_err)?;

        let (requests, inbox) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let worker_pending = Arc::clone(&pending);
        let worker_stop = stop.clone();
        let worker = std::thread::Builder::new()
            .name("ipcbridge-delay".to_string())
            .spawn(move || runtime.block_on(run(inbox, worker_stop, worker_pending, sink)))
            .map_err(spawn_err)?;

        Ok(Self {
            requests,
            pending,
            stop,
            worker: Some(worker),
        })
    }

    /// Queue `message` for release after `delay`.
    pub fn schedule(&self, message: DataMessage, delay: Duration) {
        let due = Instant::now() + delay.min(MAX_DELAY);
        self.pending.fetch_add(1, AtomicOrdering::SeqCst);
        if self.requests.send(Request { due, message }).is_err() {
            self.pending.fetch_sub(1, AtomicOrdering::SeqCst);
            warn!("delay timer stopped; delayed message dropped");
        }
    }

    /// Messages waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.pending.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for DelayQueue {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(worker) = self.worker.take() {
            // Dropped from inside the sink: the timer loop exits on its own.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
        self.pending.store(0, AtomicOrdering::SeqCst);
    }
}

async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut inbox: UnboundedReceiver<Request>,
    stop: CancellationToken,
    pending: Arc<AtomicUsize>,
    sink: impl Fn(DataMessage),
) {
    let mut heap = BinaryHeap::new();
    let mut next_seq = 0u64;

    loop {
        let next_due = heap.peek().map(|next: &Scheduled| next.due);
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            request = inbox.recv() => {
                let Some(Request { due, message }) = request else {
                    break;
                };
                heap.push(Scheduled { due, seq: next_seq, message });
                next_seq = next_seq.wrapping_add(1);
            }
            _ = sleep_until(next_due) => {
                while heap.peek().is_some_and(|next| next.due <= Instant::now()) {
                    let Some(item) = heap.pop() else {
                        break;
                    };
                    pending.fetch_sub(1, AtomicOrdering::SeqCst);
                    let (group, id) = (item.message.group, item.message.id);
                    if std::panic::catch_unwind(AssertUnwindSafe(|| sink(item.message))).is_err() {
                        warn!(group, id, "delayed send panicked");
                    }
                    if stop.is_cancelled() {
                        break;
                    }
                }
            }
        }
    }

    if !heap.is_empty() {
        debug!(discarded = heap.len(), "delay timer stopped with pending messages");
    }
}
