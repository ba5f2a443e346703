//! The simulated gateway and its shared state.

use async_trait::async_trait;
use bytes::Bytes;
use gateway_core::{
    Channel, Endpoint, Method, SessionCredentials, TimingProfile, Transport, TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::channel::{MockChannel, Role};
use crate::faults::{Fault, FaultPlan};
use crate::resources::ResourceTree;

/// Identity the gateway accepts together with its printed security code.
pub const BOOTSTRAP_IDENTITY: &str = "Client_identity";
/// Resource that issues per-client keys.
pub const BOOTSTRAP_PATH: &str = "/15011/9063";
/// Gateway information and settings.
pub const GATEWAY_PATH: &str = "/15011/15012";

pub(crate) const DEVICES: &str = "/15001";
pub(crate) const GROUPS: &str = "/15004";
pub(crate) const SCENES: &str = "/15005";

const FIRMWARE_VERSION: &str = "1.3.14";

/// One exchange as seen by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub payload: Option<Value>,
    pub observe: bool,
    /// Identity of the session that carried the exchange.
    pub identity: String,
}

pub(crate) struct Observer {
    pub(crate) channel: u64,
    pub(crate) path: String,
    pub(crate) tx: mpsc::UnboundedSender<Bytes>,
}

#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) handshakes: AtomicUsize,
    pub(crate) bootstraps: AtomicUsize,
    pub(crate) closed_channels: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) max_active: AtomicUsize,
    pub(crate) next_channel: AtomicU64,
}

pub(crate) struct GatewayState {
    pub(crate) security_code: String,
    pub(crate) resources: Mutex<ResourceTree>,
    /// Issued keys by client identity.
    pub(crate) clients: Mutex<HashMap<String, String>>,
    pub(crate) observers: Mutex<Vec<Observer>>,
    pub(crate) faults: Mutex<FaultPlan>,
    pub(crate) status_overrides: Mutex<HashMap<String, String>>,
    pub(crate) log: Mutex<Vec<RecordedRequest>>,
    pub(crate) latency: Mutex<Duration>,
    pub(crate) stats: Stats,
    /// Count of exchanges that reached the gateway.
    pub(crate) started: watch::Sender<usize>,
}

impl GatewayState {
    pub(crate) fn latency(&self) -> Duration {
        *self.latency.lock()
    }

    /// Send `payload` to every live observer of `path`.
    pub(crate) fn notify(&self, path: &str, payload: Bytes) -> usize {
        let mut observers = self.observers.lock();
        observers.retain(|o| !o.tx.is_closed());
        let mut delivered = 0;
        for observer in observers.iter().filter(|o| o.path == path) {
            if observer.tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub(crate) fn issue_key(&self, identity: &str) -> String {
        let serial = self.stats.bootstraps.fetch_add(1, Ordering::SeqCst) + 1;
        let key = format!("{:08x}{:08x}", fnv1a(identity.as_bytes()), serial);
        self.clients.lock().insert(identity.to_string(), key.clone());
        key
    }
}

/// 32-bit FNV-1a, enough to make issued keys look distinct per identity.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

/// Simulated lighting gateway implementing [`Transport`].
///
/// Cloning yields another handle to the same gateway, so a test can keep one
/// clone for inspection while the dispatcher owns another.
///
/// # Example
///
/// ```
/// use gateway_mock::MockGateway;
///
/// let gateway = MockGateway::new("ABC123")
///     .with_device(65536, "Desk lamp")
///     .with_group(131073, "Living room");
/// assert!(gateway.resource("/15001/65536").is_some());
/// ```
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<GatewayState>,
}

impl MockGateway {
    /// A gateway with the given printed security code and only its info resource.
    pub fn new(security_code: impl Into<String>) -> Self {
        let mut resources = ResourceTree::default();
        resources.insert(
            GATEWAY_PATH,
            json!({"9023": "pool.ntp.org", "9029": FIRMWARE_VERSION, "9059": 0}),
        );
        let (started, _) = watch::channel(0);

        Self {
            state: Arc::new(GatewayState {
                security_code: security_code.into(),
                resources: Mutex::new(resources),
                clients: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
                faults: Mutex::new(FaultPlan::default()),
                status_overrides: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
                latency: Mutex::new(Duration::ZERO),
                stats: Stats::default(),
                started,
            }),
        }
    }

    /// Add a bulb with a single light control, switched off.
    pub fn with_device(self, id: u64, name: &str) -> Self {
        self.insert_resource(
            format!("{}/{}", DEVICES, id),
            json!({
                "9001": name,
                "9003": id,
                "5750": 2,
                "3311": [{"5850": 0, "5851": 0, "5706": "f5faf6", "9003": 0}],
            }),
        );
        self
    }

    pub fn with_group(self, id: u64, name: &str) -> Self {
        self.insert_resource(
            format!("{}/{}", GROUPS, id),
            json!({"9001": name, "9003": id, "5850": 0, "5851": 0, "9039": 0}),
        );
        self
    }

    pub fn with_scene(self, group: u64, id: u64, name: &str) -> Self {
        self.insert_resource(
            format!("{}/{}/{}", SCENES, group, id),
            json!({"9001": name, "9003": id, "9057": 0}),
        );
        self
    }

    /// Register a client key as if bootstrap had already happened.
    pub fn with_client(self, identity: impl Into<String>, key: impl Into<String>) -> Self {
        self.state.clients.lock().insert(identity.into(), key.into());
        self
    }

    /// Delay applied to every handshake and exchange.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    pub fn insert_resource(&self, path: impl Into<String>, value: Value) {
        self.state.resources.lock().insert(path, value);
    }

    /// Load resources from a JSON object keyed by path. Returns how many were loaded.
    pub fn load_fixture(&self, fixture: &str) -> anyhow::Result<usize> {
        self.state.resources.lock().load_fixture(fixture)
    }

    /// Current representation of a resource.
    pub fn resource(&self, path: &str) -> Option<Value> {
        self.state.resources.lock().get(path).cloned()
    }

    /// Answer every exchange on `path` with `code` until cleared.
    pub fn set_status(&self, path: impl Into<String>, code: impl Into<String>) {
        self.state
            .status_overrides
            .lock()
            .insert(path.into(), code.into());
    }

    pub fn clear_status(&self, path: &str) {
        self.state.status_overrides.lock().remove(path);
    }

    /// Queue a one-shot fault.
    pub fn inject(&self, fault: Fault) {
        debug!(?fault, "mock gateway fault injected");
        self.state.faults.lock().push(fault);
    }

    /// Faults injected but not yet fired.
    pub fn pending_faults(&self) -> usize {
        self.state.faults.lock().len()
    }

    /// Push a JSON update to observers of `path`. Returns how many received it.
    pub fn push_update(&self, path: &str, value: &Value) -> usize {
        match serde_json::to_vec(value) {
            Ok(body) => self.state.notify(path, Bytes::from(body)),
            Err(e) => {
                warn!(error = %e, "mock gateway could not encode update");
                0
            }
        }
    }

    /// Push raw bytes to observers of `path`, valid JSON or not.
    pub fn push_raw(&self, path: &str, payload: impl Into<Bytes>) -> usize {
        self.state.notify(path, payload.into())
    }

    /// Every exchange received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.log.lock().clone()
    }

    /// Paths of every exchange received so far, in arrival order.
    pub fn request_paths(&self) -> Vec<String> {
        self.state.log.lock().iter().map(|r| r.path.clone()).collect()
    }

    pub fn clear_requests(&self) {
        self.state.log.lock().clear();
    }

    pub fn bootstrap_count(&self) -> usize {
        self.state.stats.bootstraps.load(Ordering::SeqCst)
    }

    pub fn handshake_count(&self) -> usize {
        self.state.stats.handshakes.load(Ordering::SeqCst)
    }

    pub fn closed_channels(&self) -> usize {
        self.state.stats.closed_channels.load(Ordering::SeqCst)
    }

    /// Exchanges currently being processed.
    pub fn in_flight(&self) -> usize {
        self.state.stats.active.load(Ordering::SeqCst)
    }

    /// Highest number of exchanges ever processed at the same time.
    pub fn max_concurrent_exchanges(&self) -> usize {
        self.state.stats.max_active.load(Ordering::SeqCst)
    }

    /// Live observers of `path`.
    pub fn observer_count(&self, path: &str) -> usize {
        self.state
            .observers
            .lock()
            .iter()
            .filter(|o| o.path == path && !o.tx.is_closed())
            .count()
    }

    /// Key issued to `identity`, if it bootstrapped or was registered.
    pub fn issued_key(&self, identity: &str) -> Option<String> {
        self.state.clients.lock().get(identity).cloned()
    }

    /// Wait until at least `count` exchanges have reached the gateway.
    pub async fn wait_for_exchanges(&self, count: usize) {
        let mut started = self.state.started.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = started.wait_for(|n| *n >= count).await;
    }

    fn authorize(&self, credentials: &SessionCredentials) -> Option<Role> {
        let identity = credentials.identity_lossy();
        let key = credentials.key_lossy();

        if identity == BOOTSTRAP_IDENTITY {
            return (key == self.state.security_code).then_some(Role::Bootstrap);
        }
        let clients = self.state.clients.lock();
        match clients.get(&identity) {
            Some(issued) if *issued == key => Some(Role::Client(identity)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("clients", &self.state.clients.lock().len())
            .field("handshakes", &self.handshake_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[async_trait]
impl Transport for MockGateway {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &SessionCredentials,
        timing: &TimingProfile,
    ) -> Result<Box<dyn Channel>, TransportError> {
        self.state.stats.handshakes.fetch_add(1, Ordering::SeqCst);

        let latency = self.state.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.state.faults.lock().take_handshake() {
            return Err(TransportError::Handshake("injected handshake failure".into()));
        }

        let role = self.authorize(credentials).ok_or_else(|| {
            TransportError::Handshake(format!(
                "unknown identity or key for {}",
                credentials.identity_lossy()
            ))
        })?;

        let id = self.state.stats.next_channel.fetch_add(1, Ordering::SeqCst);
        debug!(%endpoint, channel = id, identity = %credentials.identity_lossy(), "mock gateway handshake complete");

        Ok(Box::new(MockChannel::new(
            id,
            role,
            timing.clone(),
            self.state.clone(),
        )))
    }
}
