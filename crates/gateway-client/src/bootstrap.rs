//! Credential bootstrap.
//!
//! Trades the gateway's printed security code for a key issued to a chosen
//! client identity. The exchange runs on its own short-lived session
//! authenticated as [`BOOTSTRAP_IDENTITY`]; that session is always closed
//! before returning.

use gateway_core::{
    DispatchError, Endpoint, ResponseOutcome, Result, SessionCredentials, TimingProfile, Transport,
};
use tracing::{info, instrument, warn};

use crate::command::{self, BootstrapReply, BOOTSTRAP_IDENTITY};
use crate::session::SecureSession;

/// Request a per-client key for `identity` using the printed `security_code`.
///
/// Returns the credentials to use for every later session. Any failure,
/// including a rejected handshake, is reported as
/// [`DispatchError::BootstrapFailed`]; the security code is never used as a
/// fallback key.
#[instrument(skip(transport, timing, security_code))]
pub async fn bootstrap(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    timing: &TimingProfile,
    identity: &str,
    security_code: &str,
) -> Result<SessionCredentials> {
    let credentials = SessionCredentials::new(BOOTSTRAP_IDENTITY, security_code);
    let session = SecureSession::open(transport, endpoint, &credentials, timing)
        .await
        .map_err(failed)?;

    let result = request_key(&session, identity).await;
    session.close().await;

    match result {
        Ok(key) => {
            info!("gateway issued client key");
            Ok(SessionCredentials::new(identity, key))
        }
        Err(e) => {
            warn!(error = %e, "bootstrap rejected");
            Err(failed(e))
        }
    }
}

async fn request_key(session: &SecureSession, identity: &str) -> Result<String> {
    let request = command::bootstrap(identity)?.to_request(session.endpoint());
    let classified = session.exchange(&request).await?;

    let payload = match classified.outcome {
        ResponseOutcome::Success(payload) => payload,
        ResponseOutcome::StatusOnly(code) => {
            return Err(DispatchError::BootstrapFailed(format!(
                "gateway answered {} without issuing a key",
                code
            )))
        }
    };
    let reply: BootstrapReply = serde_json::from_value(payload).map_err(|e| {
        DispatchError::BootstrapFailed(format!("response carried no key under 9091: {}", e))
    })?;
    if reply.key.is_empty() {
        return Err(DispatchError::BootstrapFailed("gateway issued an empty key".into()));
    }
    Ok(reply.key)
}

fn failed(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::BootstrapFailed(_) => err,
        other => DispatchError::BootstrapFailed(other.to_string()),
    }
}
