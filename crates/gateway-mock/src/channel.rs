//! Secured channel to the simulated gateway.
//!
//! The channel does not enforce one-exchange-at-a-time; it only counts
//! overlapping exchanges so tests can assert the dispatcher never produced any.

use async_trait::async_trait;
use bytes::Bytes;
use gateway_core::{Channel, Method, RawResponse, RequestDescriptor, TimingProfile, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use crate::faults::Fault;
use crate::gateway::{
    GatewayState, Observer, RecordedRequest, BOOTSTRAP_IDENTITY, BOOTSTRAP_PATH, DEVICES, GROUPS,
    SCENES,
};

/// What a session is allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Role {
    /// Authenticated with the printed security code; may only request a key.
    Bootstrap,
    /// Authenticated with an issued key.
    Client(String),
}

impl Role {
    fn identity(&self) -> &str {
        match self {
            Role::Bootstrap => BOOTSTRAP_IDENTITY,
            Role::Client(identity) => identity,
        }
    }
}

pub(crate) struct MockChannel {
    id: u64,
    role: Role,
    timing: TimingProfile,
    state: Arc<GatewayState>,
    closed: AtomicBool,
}

/// Marks one exchange as active for the concurrency counters.
struct ActiveExchange<'a>(&'a GatewayState);

impl<'a> ActiveExchange<'a> {
    fn enter(state: &'a GatewayState) -> Self {
        let now = state.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.stats.max_active.fetch_max(now, Ordering::SeqCst);
        state.started.send_modify(|n| *n += 1);
        Self(state)
    }
}

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.0.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockChannel {
    pub(crate) fn new(id: u64, role: Role, timing: TimingProfile, state: Arc<GatewayState>) -> Self {
        Self {
            id,
            role,
            timing,
            state,
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, request: &RequestDescriptor, payload: Option<Value>) {
        self.state.log.lock().push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            payload,
            observe: request.observe,
            identity: self.role.identity().to_string(),
        });
    }

    async fn apply_fault(&self, fault: Fault) -> Result<RawResponse, TransportError> {
        match fault {
            Fault::Timeout { .. } => {
                tokio::time::sleep(self.timing.max_transmit_span()).await;
                Err(TransportError::Timeout {
                    retransmits: self.timing.max_retransmit,
                })
            }
            Fault::EmptyResponse { .. } => Ok(RawResponse::status("")),
            Fault::Status { code, .. } => Ok(RawResponse::status(code)),
            Fault::Disconnect { .. } => {
                self.detach_observers();
                self.closed.store(true, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
            Fault::RejectHandshake => Ok(RawResponse::status("5.00")),
        }
    }

    fn route(
        &self,
        request: &RequestDescriptor,
        payload: Option<Value>,
    ) -> Result<RawResponse, TransportError> {
        match (&self.role, request.method) {
            (Role::Bootstrap, Method::BootstrapWrite) if request.path == BOOTSTRAP_PATH => {
                Ok(self.bootstrap(payload))
            }
            (Role::Bootstrap, _) => Ok(RawResponse::status("4.01")),
            (Role::Client(_), Method::BootstrapWrite) => Ok(RawResponse::status("4.03")),
            (Role::Client(_), Method::Read) => self.read(&request.path, request.observe),
            (Role::Client(_), Method::Write) => Ok(self.write(&request.path, payload)),
        }
    }

    fn bootstrap(&self, payload: Option<Value>) -> RawResponse {
        let identity = payload
            .as_ref()
            .and_then(|p| p.get("9090"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        let Some(identity) = identity else {
            return RawResponse::status("4.00");
        };

        let key = self.state.issue_key(identity);
        debug!(identity, "mock gateway issued client key");
        json_response("2.01", &json!({"9091": key, "9029": "1.3.14"}))
    }

    fn read(&self, path: &str, observe: bool) -> Result<RawResponse, TransportError> {
        let body = {
            let resources = self.state.resources.lock();
            match resources.get(path) {
                Some(value) => value.clone(),
                None if is_collection(path, &resources) => {
                    let parent = path.trim_end_matches('/');
                    json!(resources.child_ids(parent))
                }
                None => return Ok(RawResponse::status("4.04")),
            }
        };

        let response = json_response("2.05", &body);
        if !observe {
            return Ok(response);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.observers.lock().push(Observer {
            channel: self.id,
            path: path.to_string(),
            tx,
        });
        trace!(channel = self.id, path, "mock gateway observer registered");
        Ok(response.with_updates(Box::pin(UnboundedReceiverStream::new(rx))))
    }

    fn write(&self, path: &str, payload: Option<Value>) -> RawResponse {
        let Some(update) = payload else {
            return RawResponse::status("4.00");
        };
        let merged = self.state.resources.lock().merge(path, &update);
        match merged {
            Some(representation) => {
                if let Ok(body) = serde_json::to_vec(&representation) {
                    self.state.notify(path, Bytes::from(body));
                }
                RawResponse::status("2.04")
            }
            None => RawResponse::status("4.04"),
        }
    }

    fn detach_observers(&self) {
        self.state.observers.lock().retain(|o| o.channel != self.id);
    }
}

fn json_response(code: &str, body: &Value) -> RawResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => RawResponse::new(code, bytes),
        Err(_) => RawResponse::status("5.00"),
    }
}

/// Device and group roots, and the scene list of an existing group.
fn is_collection(path: &str, resources: &crate::resources::ResourceTree) -> bool {
    if path == DEVICES || path == GROUPS {
        return true;
    }
    path.strip_prefix(SCENES)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|group| !group.contains('/'))
        .map_or(false, |group| resources.contains(&format!("{}/{}", GROUPS, group)))
}

#[async_trait]
impl Channel for MockChannel {
    async fn exchange(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let _active = ActiveExchange::enter(&self.state);

        let payload = match request.payload.as_ref() {
            // Round-trip through bytes as the wire would.
            Some(_) => {
                let body = request
                    .encode_payload()
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
                Some(
                    serde_json::from_slice::<Value>(&body)
                        .map_err(|e| TransportError::Protocol(e.to_string()))?,
                )
            }
            None => None,
        };
        self.record(request, payload.clone());
        trace!(channel = self.id, method = %request.method, path = %request.path, "mock gateway exchange");

        let latency = self.state.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = self.state.faults.lock().take_exchange(&request.path);
        if let Some(fault) = fault {
            debug!(?fault, path = %request.path, "mock gateway firing fault");
            return self.apply_fault(fault).await;
        }

        let status = self.state.status_overrides.lock().get(&request.path).cloned();
        if let Some(code) = status {
            return Ok(RawResponse::status(code));
        }

        self.route(request, payload)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.detach_observers();
            self.state.stats.closed_channels.fetch_add(1, Ordering::SeqCst);
            debug!(channel = self.id, "mock gateway channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockGateway;
    use gateway_core::{Endpoint, SessionCredentials, Transport, DEFAULT_COAPS_PORT};
    use std::time::Duration;

    async fn client_channel(gateway: &MockGateway) -> Box<dyn Channel> {
        gateway
            .open(
                &Endpoint::new("mock", DEFAULT_COAPS_PORT),
                &SessionCredentials::new("known", "k3y"),
                &TimingProfile::default(),
            )
            .await
            .unwrap()
    }

    fn get(path: &str) -> RequestDescriptor {
        RequestDescriptor::new(&Endpoint::new("mock", DEFAULT_COAPS_PORT), Method::Read, path)
    }

    #[tokio::test]
    async fn test_collections_list_child_ids() {
        let gateway = MockGateway::new("ABC123")
            .with_client("known", "k3y")
            .with_group(131073, "Hall")
            .with_group(131072, "Kitchen")
            .with_scene(131072, 196608, "Evening");
        let channel = client_channel(&gateway).await;

        let groups = channel.exchange(&get("/15004")).await.unwrap();
        assert_eq!(&groups.payload[..], b"[131072,131073]");

        let scenes = channel.exchange(&get("/15005/131072")).await.unwrap();
        assert_eq!(&scenes.payload[..], b"[196608]");

        let devices = channel.exchange(&get("/15001")).await.unwrap();
        assert_eq!(&devices.payload[..], b"[]");

        let missing = channel.exchange(&get("/15005/999")).await.unwrap();
        assert_eq!(missing.code, "4.04");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_waits_for_retransmit_span() {
        let gateway = MockGateway::new("ABC123").with_client("known", "k3y");
        gateway.inject(Fault::timeout());
        let channel = client_channel(&gateway).await;

        let started = tokio::time::Instant::now();
        let result = channel.exchange(&get("/15011/15012")).await;
        assert_eq!(result.unwrap_err(), TransportError::Timeout { retransmits: 2 });
        // 0.5 s * (2^2 - 1) * 1.0
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_status_override_and_closed_channel() {
        let gateway = MockGateway::new("ABC123").with_client("known", "k3y");
        gateway.set_status("/15011/15012", "5.03");
        let channel = client_channel(&gateway).await;

        let response = channel.exchange(&get("/15011/15012")).await.unwrap();
        assert_eq!(response.code, "5.03");

        channel.close().await;
        channel.close().await;
        assert_eq!(gateway.closed_channels(), 1);
        assert_eq!(
            channel.exchange(&get("/15011/15012")).await.unwrap_err(),
            TransportError::Closed
        );
    }
}
