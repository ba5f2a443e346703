//! Category-keyed admission queue.
//!
//! A [`RequestThrottle`] holds one lane per category. Each lane admits tasks
//! into a FIFO queue and grants at most `concurrency` of them at a time. With
//! a concurrency of one, a lane serializes everything submitted to it: the
//! next task is granted only after the previous one ran to completion.
//!
//! # Key Design: single worker per lane
//!
//! `submit` enqueues synchronously, before returning its future, so the order
//! of `submit` calls is the order of grants. A single worker task per lane
//! pops the queue and waits on a semaphore for a free slot, which keeps grant
//! order strictly FIFO without the caller having to poll its future first.
//!
//! `abort` bumps the lane generation. Queued tasks from an older generation
//! are discarded (their futures resolve to [`ThrottleError::Aborted`]) and the
//! lane is immediately reusable. Tasks already granted are never interrupted.
//!
//! # Example
//!
//! ```
//! use gateway_throttle::RequestThrottle;
//!
//! # tokio_test::block_on(async {
//! let throttle = RequestThrottle::builder().lane("coap-req", 1).build()?;
//!
//! let first = throttle.submit("coap-req", || async { 1 });
//! let second = throttle.submit("coap-req", || async { 2 });
//! assert_eq!(first.await?, 1);
//! assert_eq!(second.await?, 2);
//! # Ok::<(), gateway_throttle::ThrottleError>(())
//! # });
//! ```

mod lane;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tokio::runtime::Handle;

use lane::Lane;

/// Errors returned by the throttle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    /// The task was discarded by `abort` (or throttle shutdown) before it was granted.
    #[error("task discarded before it was granted")]
    Aborted,

    /// No lane is registered under this category.
    #[error("unknown throttle category: {0}")]
    UnknownCategory(String),

    /// A lane was configured with zero concurrency.
    #[error("throttle category {0} needs a concurrency of at least 1")]
    InvalidConcurrency(String),

    /// Lanes spawn a worker and must be built inside a Tokio runtime.
    #[error("throttle must be built inside a Tokio runtime")]
    NoRuntime,
}

/// Builder registering the lanes of a [`RequestThrottle`].
#[derive(Debug, Default)]
pub struct ThrottleBuilder {
    lanes: Vec<(String, usize)>,
}

impl ThrottleBuilder {
    /// Register a lane for `category` admitting `concurrency` tasks at a time.
    pub fn lane(mut self, category: impl Into<String>, concurrency: usize) -> Self {
        self.lanes.push((category.into(), concurrency));
        self
    }

    /// Spawn the lane workers on the current Tokio runtime.
    pub fn build(self) -> Result<RequestThrottle, ThrottleError> {
        let handle = Handle::try_current().map_err(|_| ThrottleError::NoRuntime)?;
        let mut lanes = HashMap::with_capacity(self.lanes.len());
        for (category, concurrency) in self.lanes {
            if concurrency == 0 {
                return Err(ThrottleError::InvalidConcurrency(category));
            }
            let lane = Lane::spawn(&handle, &category, concurrency);
            lanes.insert(category, lane);
        }
        Ok(RequestThrottle { lanes })
    }
}

/// Admission queue with one FIFO lane per category.
///
/// Dropping the throttle discards every queued task; granted tasks still run
/// to completion.
pub struct RequestThrottle {
    lanes: HashMap<String, Lane>,
}

impl RequestThrottle {
    pub fn builder() -> ThrottleBuilder {
        ThrottleBuilder::default()
    }

    /// Submit `task` to the lane for `category`.
    ///
    /// The task is queued before this function returns. The returned future
    /// resolves with the task's output once it was granted and ran, or with
    /// [`ThrottleError::Aborted`] if it was discarded while queued. Dropping
    /// the returned future does not withdraw the task.
    pub fn submit<T, F, Fut>(&self, category: &str, task: F) -> BoxFuture<'static, Result<T, ThrottleError>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let queued = self.lane(category).map(|lane| lane.enqueue(task));
        Box::pin(async move { queued?.await.map_err(|_| ThrottleError::Aborted) })
    }

    /// Discard all queued tasks of `category` and reset the lane for reuse.
    ///
    /// Returns the number of tasks that were waiting. A granted task is not affected.
    pub fn abort(&self, category: &str) -> Result<usize, ThrottleError> {
        Ok(self.lane(category)?.abort())
    }

    /// Abort every lane.
    pub fn abort_all(&self) -> usize {
        self.lanes.values().map(Lane::abort).sum()
    }

    /// Tasks queued in `category` and not yet granted.
    pub fn pending(&self, category: &str) -> Result<usize, ThrottleError> {
        Ok(self.lane(category)?.pending())
    }

    /// Tasks of `category` currently granted and running.
    pub fn in_flight(&self, category: &str) -> Result<usize, ThrottleError> {
        Ok(self.lane(category)?.in_flight())
    }

    /// Concurrency ceiling of `category`.
    pub fn concurrency(&self, category: &str) -> Result<usize, ThrottleError> {
        Ok(self.lane(category)?.concurrency())
    }

    /// Wait until no task of `category` holds a slot.
    pub async fn quiesce(&self, category: &str) -> Result<(), ThrottleError> {
        self.lane(category)?.quiesce().await;
        Ok(())
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.lanes.keys().map(String::as_str)
    }

    fn lane(&self, category: &str) -> Result<&Lane, ThrottleError> {
        self.lanes
            .get(category)
            .ok_or_else(|| ThrottleError::UnknownCategory(category.to_string()))
    }
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, lane) in &self.lanes {
            map.entry(name, &lane.concurrency());
        }
        map.finish()
    }
}
