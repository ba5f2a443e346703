//! Transport boundary.
//!
//! The secured datagram transport (DTLS handshake, CoAP retransmission
//! timers, encryption) is an external collaborator. The dispatcher consumes
//! it through two traits:
//!
//! - [`Transport`]: opens a [`Channel`] to a fixed endpoint with a pair of
//!   PSK-style credentials and a [`TimingProfile`]
//! - [`Channel`]: performs one exchange at a time and is closed explicitly
//!
//! Any type implementing these traits can back the dispatcher, including the
//! in-memory gateway in the `gateway-mock` crate.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::config::TimingProfile;
use crate::credentials::SessionCredentials;
use crate::request::{Endpoint, RequestDescriptor};

/// Push updates following an observing exchange, in transport order.
pub type UpdateStream = BoxStream<'static, Bytes>;

/// Failures reported by the transport itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The secured-session handshake failed (bad credentials, no peer).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No acknowledgement after exhausting retransmissions.
    #[error("exchange timed out after {retransmits} retransmissions")]
    Timeout { retransmits: u32 },

    /// Socket level failure.
    #[error("network error: {0}")]
    Io(String),

    /// The channel was closed underneath the exchange.
    #[error("channel closed")]
    Closed,

    /// The peer sent something the transport could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Raw result of one exchange as reported by the transport.
pub struct RawResponse {
    /// Status in class-dot-detail form, e.g. `"2.05"` or `"4.04"`.
    pub code: String,
    /// Response payload; empty when the response carried none.
    pub payload: Bytes,
    /// Subsequent notifications, present only for observing exchanges.
    pub updates: Option<UpdateStream>,
}

impl RawResponse {
    /// A response with a status code and payload and no update stream.
    pub fn new(code: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            payload: payload.into(),
            updates: None,
        }
    }

    /// A response carrying only a status code.
    pub fn status(code: impl Into<String>) -> Self {
        Self::new(code, Bytes::new())
    }

    /// Attach the stream of push updates for an observing exchange.
    pub fn with_updates(mut self, updates: UpdateStream) -> Self {
        self.updates = Some(updates);
        self
    }
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("code", &self.code)
            .field("payload_len", &self.payload.len())
            .field("observing", &self.updates.is_some())
            .finish()
    }
}

/// Factory for secured channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a secured channel; resolves once the handshake completed.
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &SessionCredentials,
        timing: &TimingProfile,
    ) -> Result<Box<dyn Channel>, TransportError>;
}

/// An open secured channel to the gateway.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Perform one request/response exchange.
    ///
    /// When `request.observe` is set, the returned response carries the
    /// stream of subsequent notifications.
    async fn exchange(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError>;

    /// Release the channel. Calling it more than once has no effect.
    async fn close(&self);
}
