//! Secure session handle.
//!
//! Owns exactly one open [`Channel`] to the gateway. Serializing exchanges is
//! the throttle's job; the handle only refuses to overlap them so a
//! misbehaving caller cannot interleave two exchanges on the channel.

use gateway_core::{
    Channel, DispatchError, Endpoint, RequestDescriptor, Result, SessionCredentials, TimingProfile,
    Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument};

use crate::classify::{classify, Classified};

pub struct SecureSession {
    channel: Box<dyn Channel>,
    endpoint: Endpoint,
    identity: String,
    in_flight: AtomicBool,
    closed: AtomicBool,
}

/// Clears the in-flight flag when the exchange ends, including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SecureSession {
    /// Open a secured channel; resolves once the handshake completed.
    ///
    /// Handshake and network failures map to [`DispatchError::ConnectFailed`].
    #[instrument(skip(transport, credentials, timing), fields(identity = %credentials.identity_lossy()))]
    pub async fn open(
        transport: &dyn Transport,
        endpoint: &Endpoint,
        credentials: &SessionCredentials,
        timing: &TimingProfile,
    ) -> Result<Self> {
        let channel = transport
            .open(endpoint, credentials, timing)
            .await
            .map_err(DispatchError::ConnectFailed)?;

        info!(%endpoint, "secure session established");
        Ok(Self {
            channel,
            endpoint: endpoint.clone(),
            identity: credentials.identity_lossy(),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Perform one exchange and classify its first response.
    ///
    /// For observing requests the result carries the stream of later pushes.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn exchange(&self, request: &RequestDescriptor) -> Result<Classified> {
        if self.is_closed() {
            return Err(DispatchError::SessionClosed);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DispatchError::ConcurrentExchange);
        }
        let _guard = InFlight(&self.in_flight);

        let response = self.channel.exchange(request).await?;
        debug!(code = %response.code, bytes = response.payload.len(), "exchange complete");
        classify(request, response)
    }

    /// Release the channel. Only the first call reaches the transport.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close().await;
        info!(endpoint = %self.endpoint, "secure session closed");
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
