//! One admission lane: a FIFO queue drained by a single worker task.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type RunFn = Box<dyn FnOnce(ThrottleSlot) -> BoxFuture<'static, ()> + Send>;

/// A submitted task waiting in the lane queue.
struct Job {
    ticket: u64,
    generation: u64,
    run: RunFn,
}

/// Admission ticket held by a granted task.
///
/// Lifecycle: requested -> queued -> granted -> released. The permit inside
/// is returned to the lane when the slot drops.
pub(crate) struct ThrottleSlot {
    category: Arc<str>,
    ticket: u64,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ThrottleSlot {
    fn drop(&mut self) {
        trace!(category = %self.category, ticket = self.ticket, "throttle slot released");
    }
}

pub(crate) struct Lane {
    name: Arc<str>,
    concurrency: usize,
    tx: mpsc::UnboundedSender<Job>,
    /// Bumped by `abort`; queued jobs from an older generation are discarded.
    generation: watch::Sender<u64>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    next_ticket: AtomicU64,
    worker: JoinHandle<()>,
}

impl Lane {
    pub(crate) fn spawn(handle: &Handle, name: &str, concurrency: usize) -> Self {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::unbounded_channel();
        let (generation, generation_rx) = watch::channel(0u64);
        let permits = Arc::new(Semaphore::new(concurrency));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = handle.spawn(drain(
            name.clone(),
            rx,
            generation_rx,
            permits.clone(),
            pending.clone(),
        ));

        debug!(category = %name, concurrency, "throttle lane started");

        Self {
            name,
            concurrency,
            tx,
            generation,
            permits,
            pending,
            next_ticket: AtomicU64::new(0),
            worker,
        }
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queue `task`; the receiver yields its output once it ran, or errors if
    /// the task was discarded before being granted.
    pub(crate) fn enqueue<T, F, Fut>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let generation = *self.generation.borrow();

        let run: RunFn = Box::new(move |slot: ThrottleSlot| {
            Box::pin(async move {
                let output = task().await;
                drop(slot);
                // The caller may have stopped waiting; the task still ran to completion.
                let _ = result_tx.send(output);
            })
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .tx
            .send(Job {
                ticket,
                generation,
                run,
            })
            .is_err()
        {
            // Worker is gone; dropping the job resolves the receiver as aborted.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        } else {
            trace!(category = %self.name, ticket, "throttle slot requested");
        }

        result_rx
    }

    /// Discard every queued, not yet granted task. Returns how many were queued.
    pub(crate) fn abort(&self) -> usize {
        let discarded = self.pending.load(Ordering::SeqCst);
        self.generation.send_modify(|g| *g += 1);
        debug!(category = %self.name, discarded, "throttle lane aborted");
        discarded
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of granted slots currently held.
    pub(crate) fn in_flight(&self) -> usize {
        self.concurrency
            .saturating_sub(self.permits.available_permits())
    }

    /// Wait until every granted task has released its slot.
    pub(crate) async fn quiesce(&self) {
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        // Dropping the worker drops the queue; granted tasks keep running.
        self.worker.abort();
    }
}

/// Worker loop: grants queued jobs strictly in arrival order.
async fn drain(
    name: Arc<str>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    mut generation: watch::Receiver<u64>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        let current = *generation.borrow_and_update();
        if job.generation != current {
            discard(&name, &pending, job);
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = generation.wait_for(|g| *g != job.generation) => {
                discard(&name, &pending, job);
                continue;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        pending.fetch_sub(1, Ordering::SeqCst);
        trace!(category = %name, ticket = job.ticket, "throttle slot granted");

        let slot = ThrottleSlot {
            category: name.clone(),
            ticket: job.ticket,
            _permit: permit,
        };
        tokio::spawn((job.run)(slot));
    }

    debug!(category = %name, "throttle lane worker stopped");
}

fn discard(name: &Arc<str>, pending: &AtomicUsize, job: Job) {
    pending.fetch_sub(1, Ordering::SeqCst);
    debug!(category = %name, ticket = job.ticket, "discarding queued task after abort");
    drop(job);
}
