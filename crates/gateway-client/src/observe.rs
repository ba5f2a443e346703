//! Observation of pushed resource updates.
//!
//! An observing exchange resolves on its first acknowledgement. The
//! representation carried by that acknowledgement, then everything the
//! gateway pushes afterwards, is decoded and delivered through an
//! [`Observation`], a `Stream` of JSON values in transport order. Each
//! registration gets its own stream. Payloads that are not valid JSON are
//! logged and skipped.
//!
//! Every observation is tied to the dispatcher that created it and ends when
//! that dispatcher finishes or is dropped.

use futures::{Stream, StreamExt};
use gateway_core::UpdateStream;
use parking_lot::Mutex;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn, Instrument};

use crate::classify::decode;

/// Decoded push updates for one observed resource.
///
/// Ends when the dispatcher finishes or the session drops the observation.
pub struct Observation {
    path: String,
    status: String,
    updates: UnboundedReceiverStream<Value>,
}

impl Observation {
    /// Resource this observation follows.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Status code of the acknowledgement that started the observation.
    pub fn status(&self) -> &str {
        &self.status
    }
}

impl Stream for Observation {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        Pin::new(&mut self.updates).poll_next(cx)
    }
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("path", &self.path)
            .field("status", &self.status)
            .finish()
    }
}

/// Registration of a handler driven by an [`Observation`].
#[derive(Debug)]
pub struct ObservationHandle {
    path: String,
    task: AbortHandle,
    detached: AtomicBool,
}

impl ObservationHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stop delivering updates to the handler.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// Whether the handler may still be invoked.
    pub fn is_active(&self) -> bool {
        !self.detached.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

/// Forwarding tasks of every live observation, aborted together on finish.
#[derive(Debug, Default)]
pub(crate) struct Observers {
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Observers {
    /// Start decoding `updates` into a new [`Observation`].
    pub(crate) fn attach(&self, path: &str, status: String, updates: UpdateStream) -> Observation {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward(path.to_string(), updates, tx).in_current_span());

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task.abort_handle());

        Observation {
            path: path.to_string(),
            status,
            updates: UnboundedReceiverStream::new(rx),
        }
    }

    /// End every observation. Returns how many were still running.
    pub(crate) fn detach_all(&self) -> usize {
        let tasks: Vec<AbortHandle> = self.tasks.lock().drain(..).collect();
        let live = tasks.iter().filter(|t| !t.is_finished()).count();
        for task in tasks {
            task.abort();
        }
        live
    }
}

impl Drop for Observers {
    fn drop(&mut self) {
        self.detach_all();
    }
}

/// Drive `handler` with every update of `observation` until it ends or is detached.
pub(crate) fn spawn_handler<F>(mut observation: Observation, mut handler: F) -> ObservationHandle
where
    F: FnMut(Value) + Send + 'static,
{
    let path = observation.path.clone();
    let task = tokio::spawn(
        async move {
            while let Some(update) = observation.next().await {
                handler(update);
            }
        }
        .in_current_span(),
    );
    ObservationHandle {
        path,
        task: task.abort_handle(),
        detached: AtomicBool::new(false),
    }
}

async fn forward(path: String, mut updates: UpdateStream, tx: mpsc::UnboundedSender<Value>) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = tx.closed() => break,
            next = updates.next() => match next {
                Some(payload) => payload,
                None => break,
            },
        };
        match decode(&path, &payload) {
            Ok(value) => {
                if tx.send(value).is_err() {
                    break;
                }
            }
            Err(e) => warn!(%path, error = %e, "skipping undecodable update"),
        }
    }
    debug!(%path, "observation ended");
}
