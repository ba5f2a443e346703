//! Fault injection for the simulated gateway.
//!
//! Faults are one-shot: each injected [`Fault`] fires on the first matching
//! handshake or exchange and is then consumed. Persistent per-path status
//! codes are configured with [`MockGateway::set_status`](crate::MockGateway::set_status)
//! instead.

use std::collections::VecDeque;

/// A single injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next handshake is refused.
    RejectHandshake,
    /// The next exchange (on `path`, or any path) is never acknowledged.
    ///
    /// The channel waits for the full retransmission span of its timing
    /// profile and then reports a timeout.
    Timeout { path: Option<String> },
    /// The next exchange resolves with neither a status code nor a payload.
    EmptyResponse { path: Option<String> },
    /// The next exchange is answered with `code` and no payload.
    Status { path: Option<String>, code: String },
    /// The channel is torn down underneath the next exchange.
    Disconnect { path: Option<String> },
}

impl Fault {
    /// Timeout on the next exchange regardless of path.
    pub fn timeout() -> Self {
        Fault::Timeout { path: None }
    }

    /// Timeout on the next exchange targeting `path`.
    pub fn timeout_on(path: impl Into<String>) -> Self {
        Fault::Timeout {
            path: Some(path.into()),
        }
    }

    pub fn empty_response_on(path: impl Into<String>) -> Self {
        Fault::EmptyResponse {
            path: Some(path.into()),
        }
    }

    pub fn status_on(path: impl Into<String>, code: impl Into<String>) -> Self {
        Fault::Status {
            path: Some(path.into()),
            code: code.into(),
        }
    }

    fn matches_exchange(&self, target: &str) -> bool {
        let path = match self {
            Fault::RejectHandshake => return false,
            Fault::Timeout { path }
            | Fault::EmptyResponse { path }
            | Fault::Status { path, .. }
            | Fault::Disconnect { path } => path,
        };
        path.as_deref().map_or(true, |p| p == target)
    }
}

/// Queue of pending one-shot faults, consumed in injection order.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pending: VecDeque<Fault>,
}

impl FaultPlan {
    pub(crate) fn push(&mut self, fault: Fault) {
        self.pending.push_back(fault);
    }

    pub(crate) fn take_handshake(&mut self) -> bool {
        self.take_first(|f| matches!(f, Fault::RejectHandshake))
            .is_some()
    }

    pub(crate) fn take_exchange(&mut self, path: &str) -> Option<Fault> {
        self.take_first(|f| f.matches_exchange(path))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    fn take_first(&mut self, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let index = self.pending.iter().position(pred)?;
        self.pending.remove(index)
    }
}
