//! Dispatcher facade.
//!
//! Lifecycle: `Unconnected -> Connecting -> Connected -> Finished`.
//!
//! - `connect` bootstraps first when only the security code is known, then
//!   opens the operational session and its request throttle
//! - every operation is built by [`command`](crate::command), queued on the
//!   single `coap-req` lane and classified by [`classify`](crate::classify)
//! - `finish` discards queued work, lets the in-flight exchange complete,
//!   ends all observations and closes the session
//!
//! Each dispatcher owns its throttle, configuration and session, so several
//! dispatchers for different gateways can run side by side.

use gateway_core::{
    CredentialSource, DispatchError, DispatcherConfig, Endpoint, GatewayConfig, ResponseOutcome,
    Result, SessionCredentials, TimingProfile, Transport,
};
use gateway_throttle::RequestThrottle;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::bootstrap::bootstrap;
use crate::classify::Classified;
use crate::command::{self, Intent, LightState, DEFAULT_TRANSITION_TIME};
use crate::observe::{spawn_handler, Observation, ObservationHandle, Observers};
use crate::session::SecureSession;

/// Throttle category carrying every gateway exchange.
pub const REQUEST_CATEGORY: &str = "coap-req";

/// Exchanges the gateway can handle at once.
pub const REQUEST_CONCURRENCY: usize = 1;

/// Observable lifecycle state of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Unconnected,
    Connecting,
    Connected,
    Finished,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherState::Unconnected => write!(f, "Unconnected"),
            DispatcherState::Connecting => write!(f, "Connecting"),
            DispatcherState::Connected => write!(f, "Connected"),
            DispatcherState::Finished => write!(f, "Finished"),
        }
    }
}

/// Everything that only exists while connected.
struct Connection {
    session: Arc<SecureSession>,
    throttle: RequestThrottle,
    observers: Observers,
}

enum Lifecycle {
    Unconnected,
    Connecting,
    Connected(Arc<Connection>),
    Finished,
}

impl Lifecycle {
    fn state(&self) -> DispatcherState {
        match self {
            Lifecycle::Unconnected => DispatcherState::Unconnected,
            Lifecycle::Connecting => DispatcherState::Connecting,
            Lifecycle::Connected(_) => DispatcherState::Connected,
            Lifecycle::Finished => DispatcherState::Finished,
        }
    }
}

/// Returns a dropped or failed `connect` to `Unconnected`.
struct ConnectAttempt<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    armed: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut lifecycle = self.lifecycle.lock();
            if matches!(*lifecycle, Lifecycle::Connecting) {
                *lifecycle = Lifecycle::Unconnected;
            }
        }
    }
}

/// Throttled command dispatcher for one gateway.
///
/// # Example
///
/// ```no_run
/// use gateway_client::{Dispatcher, LightState};
/// use gateway_core::{GatewayConfig, TimingProfile, Transport};
/// use std::sync::Arc;
///
/// # async fn run(transport: Arc<dyn Transport>) -> gateway_core::Result<()> {
/// let config = GatewayConfig::new("192.168.1.20", "myhub-client").with_security_code("ABC123");
/// let dispatcher = Dispatcher::new(transport, config, TimingProfile::default());
///
/// dispatcher.connect().await?;
/// // Persist these; the security code is not needed again.
/// let credentials = dispatcher.credentials();
///
/// dispatcher
///     .set_device(65536, LightState::on().with_brightness(200), None)
///     .await?;
/// dispatcher.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: RwLock<GatewayConfig>,
    timing: TimingProfile,
    lifecycle: Mutex<Lifecycle>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: GatewayConfig, timing: TimingProfile) -> Self {
        Self {
            transport,
            config: RwLock::new(config),
            timing,
            lifecycle: Mutex::new(Lifecycle::Unconnected),
        }
    }

    /// Build from a loaded configuration, validating it first.
    pub fn from_config(transport: Arc<dyn Transport>, config: &DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(transport, config.gateway.clone(), config.timing.clone()))
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.lifecycle.lock().state()
    }

    /// Snapshot of the gateway configuration, including a derived key once
    /// bootstrap completed.
    pub fn config(&self) -> GatewayConfig {
        self.config.read().clone()
    }

    pub fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    pub fn endpoint(&self) -> Endpoint {
        self.config.read().endpoint()
    }

    /// Identity and derived key, available once bootstrap completed or a key
    /// was configured. Callers persist these between runs.
    pub fn credentials(&self) -> Option<SessionCredentials> {
        self.config.read().session_credentials()
    }

    /// Queued, not yet dispatched requests.
    pub fn pending_requests(&self) -> usize {
        match &*self.lifecycle.lock() {
            Lifecycle::Connected(conn) => conn.throttle.pending(REQUEST_CATEGORY).unwrap_or(0),
            _ => 0,
        }
    }

    /// Establish the operational session, bootstrapping first if needed.
    ///
    /// Calling `connect` on a connected dispatcher is a no-op. A failed
    /// attempt leaves the dispatcher `Unconnected` so it can be retried.
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    pub async fn connect(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Connected(_) => return Ok(()),
                Lifecycle::Connecting => return Err(DispatchError::ConnectInProgress),
                Lifecycle::Finished => return Err(DispatchError::SessionClosed),
                Lifecycle::Unconnected => *lifecycle = Lifecycle::Connecting,
            }
        }
        let mut attempt = ConnectAttempt {
            lifecycle: &self.lifecycle,
            armed: true,
        };

        let connection = self.establish().await?;

        // Only this call leaves `Connecting`.
        *self.lifecycle.lock() = Lifecycle::Connected(Arc::new(connection));
        attempt.armed = false;
        info!("dispatcher connected");
        Ok(())
    }

    async fn establish(&self) -> Result<Connection> {
        let config = self.config();
        config.validate()?;
        self.timing.validate()?;
        let endpoint = config.endpoint();

        let credentials = match config.credential_source() {
            CredentialSource::DerivedKey(_) => {
                debug!("using stored client key");
                config.session_credentials().ok_or_else(|| {
                    DispatchError::Configuration("derived key is not usable".into())
                })?
            }
            CredentialSource::SecurityCode(code) => {
                info!(identity = %config.client_identity, "bootstrapping client key");
                let credentials = bootstrap(
                    self.transport.as_ref(),
                    &endpoint,
                    &self.timing,
                    &config.client_identity,
                    code,
                )
                .await?;
                self.config.write().apply_derived_key(&credentials);
                credentials
            }
            CredentialSource::Missing => {
                return Err(DispatchError::Configuration(
                    "no security code or client key configured".into(),
                ))
            }
        };

        let session =
            SecureSession::open(self.transport.as_ref(), &endpoint, &credentials, &self.timing)
                .await?;
        let throttle = match RequestThrottle::builder()
            .lane(REQUEST_CATEGORY, REQUEST_CONCURRENCY)
            .build()
        {
            Ok(throttle) => throttle,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        Ok(Connection {
            session: Arc::new(session),
            throttle,
            observers: Observers::default(),
        })
    }

    /// Discard queued requests, wait for the in-flight exchange, end all
    /// observations and close the session.
    ///
    /// Every later operation fails with [`DispatchError::SessionClosed`].
    /// Before `connect` has completed this fails with
    /// [`DispatchError::NotConnected`] and leaves the state unchanged; once
    /// finished it is a no-op.
    #[instrument(skip(self))]
    pub async fn finish(&self) -> Result<()> {
        let conn = {
            let mut lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Connected(_) => {}
                Lifecycle::Finished => {
                    debug!("already finished");
                    return Ok(());
                }
                Lifecycle::Unconnected | Lifecycle::Connecting => {
                    return Err(DispatchError::NotConnected)
                }
            }
            match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
                Lifecycle::Connected(conn) => conn,
                _ => return Err(DispatchError::NotConnected),
            }
        };

        let discarded = conn.throttle.abort_all();
        conn.throttle.quiesce(REQUEST_CATEGORY).await?;
        let observations = conn.observers.detach_all();
        conn.session.close().await;

        info!(discarded, observations, "dispatcher finished");
        Ok(())
    }

    /// Queue one exchange on the request lane and wait for its classification.
    ///
    /// The lane is entered under the lifecycle lock, so `finish` either sees
    /// the job in the queue when it aborts or the job sees `Finished`.
    async fn execute(&self, intent: &Intent) -> Result<(Arc<Connection>, Classified)> {
        let (conn, queued) = {
            let lifecycle = self.lifecycle.lock();
            let conn = match &*lifecycle {
                Lifecycle::Connected(conn) => conn.clone(),
                Lifecycle::Unconnected | Lifecycle::Connecting => {
                    return Err(DispatchError::NotConnected)
                }
                Lifecycle::Finished => return Err(DispatchError::SessionClosed),
            };
            let request = intent.to_request(conn.session.endpoint());
            let session = conn.session.clone();
            let queued = conn.throttle.submit(REQUEST_CATEGORY, move || async move {
                session.exchange(&request).await
            });
            (conn, queued)
        };
        let classified = queued.await??;
        Ok((conn, classified))
    }

    /// Run an arbitrary intent, for resources without a typed operation.
    pub async fn request(&self, intent: Intent) -> Result<ResponseOutcome> {
        if intent.is_observing() {
            return Err(DispatchError::Configuration(
                "observing intents go through observe_path".into(),
            ));
        }
        let (_, classified) = self.execute(&intent).await?;
        Ok(classified.outcome)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: String) -> Result<T> {
        let outcome = self.request(Intent::read(path.clone())).await?;
        let payload = outcome.into_payload(&path)?;
        serde_json::from_value(payload).map_err(|source| DispatchError::Decode { path, source })
    }

    /// Fetch every id in order, stopping at the first failure.
    async fn fetch_each(&self, paths: impl IntoIterator<Item = String>) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for path in paths {
            match self.fetch(path.clone()).await {
                Ok(value) => values.push(value),
                Err(e) => {
                    warn!(%path, error = %e, "batch fetch aborted");
                    return Err(e);
                }
            }
        }
        Ok(values)
    }

    #[instrument(skip(self))]
    pub async fn get_gateway_info(&self) -> Result<Value> {
        self.fetch(command::GATEWAY_INFO.to_string()).await
    }

    /// Set the gateway's NTP server.
    #[instrument(skip(self))]
    pub async fn set_gateway(&self, ntp_server: &str) -> Result<ResponseOutcome> {
        self.request(command::set_gateway(ntp_server)?).await
    }

    pub async fn get_all_device_ids(&self) -> Result<Vec<u64>> {
        self.fetch(command::DEVICES.to_string()).await
    }

    pub async fn get_device(&self, id: u64) -> Result<Value> {
        self.fetch(command::device_path(id)).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_devices(&self) -> Result<Vec<Value>> {
        let ids = self.get_all_device_ids().await?;
        self.fetch_each(ids.into_iter().map(command::device_path)).await
    }

    pub async fn get_all_group_ids(&self) -> Result<Vec<u64>> {
        self.fetch(command::GROUPS.to_string()).await
    }

    pub async fn get_group(&self, id: u64) -> Result<Value> {
        self.fetch(command::group_path(id)).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_groups(&self) -> Result<Vec<Value>> {
        let ids = self.get_all_group_ids().await?;
        self.fetch_each(ids.into_iter().map(command::group_path)).await
    }

    pub async fn get_all_scene_ids(&self, group: u64) -> Result<Vec<u64>> {
        self.fetch(command::scene_list_path(group)).await
    }

    pub async fn get_scene(&self, group: u64, id: u64) -> Result<Value> {
        self.fetch(command::scene_path(group, id)).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_scenes(&self, group: u64) -> Result<Vec<Value>> {
        let ids = self.get_all_scene_ids(group).await?;
        self.fetch_each(ids.into_iter().map(|id| command::scene_path(group, id)))
            .await
    }

    /// Switch a device. `transition_time` defaults to 5.
    #[instrument(skip(self))]
    pub async fn set_device(
        &self,
        id: u64,
        state: LightState,
        transition_time: Option<u32>,
    ) -> Result<ResponseOutcome> {
        let transition = transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        self.request(command::set_device(id, state, transition)?)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_group(
        &self,
        id: u64,
        state: LightState,
        transition_time: Option<u32>,
    ) -> Result<ResponseOutcome> {
        let transition = transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        self.request(command::set_group(id, state, transition)?)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_color_hex(
        &self,
        id: u64,
        color: &str,
        transition_time: Option<u32>,
    ) -> Result<ResponseOutcome> {
        let transition = transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        self.request(command::set_color_hex(id, color, transition)?)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_color_xy(
        &self,
        id: u64,
        x: u32,
        y: u32,
        transition_time: Option<u32>,
    ) -> Result<ResponseOutcome> {
        let transition = transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        self.request(command::set_color_xy(id, x, y, transition)?)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_color_temp(
        &self,
        id: u64,
        x: u32,
        transition_time: Option<u32>,
    ) -> Result<ResponseOutcome> {
        let transition = transition_time.unwrap_or(DEFAULT_TRANSITION_TIME);
        self.request(command::set_color_temp(id, x, transition)?)
            .await
    }

    /// Activate `scene` on `group`.
    #[instrument(skip(self))]
    pub async fn set_scene(&self, group: u64, scene: u64) -> Result<ResponseOutcome> {
        self.request(command::set_scene(group, scene)?).await
    }

    /// Start observing any resource. Resolves on the gateway's acknowledgement;
    /// a rejected registration carries its code in [`Observation::status`]
    /// and yields no updates.
    #[instrument(skip(self))]
    pub async fn observe_path(&self, path: &str) -> Result<Observation> {
        let (conn, classified) = self.execute(&Intent::observe(path)).await?;

        let status = classified.outcome.status().unwrap_or_default().to_string();
        let updates = classified.updates.ok_or_else(|| DispatchError::EmptyResponse {
            path: path.to_string(),
        })?;
        let observation = conn.observers.attach(path, status, updates);

        // `finish` may have run between the acknowledgement and the attach.
        if conn.session.is_closed() {
            conn.observers.detach_all();
            return Err(DispatchError::SessionClosed);
        }
        Ok(observation)
    }

    pub async fn observe_device(&self, id: u64) -> Result<Observation> {
        self.observe_path(&command::device_path(id)).await
    }

    pub async fn observe_group(&self, id: u64) -> Result<Observation> {
        self.observe_path(&command::group_path(id)).await
    }

    /// Call `on_update` for every pushed update of a device until detached
    /// or the dispatcher finishes.
    pub async fn set_observer<F>(&self, id: u64, on_update: F) -> Result<ObservationHandle>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let observation = self.observe_device(id).await?;
        Ok(spawn_handler(observation, on_update))
    }

    /// Group counterpart of [`set_observer`](Self::set_observer).
    pub async fn set_observer_group<F>(&self, id: u64, on_update: F) -> Result<ObservationHandle>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let observation = self.observe_group(id).await?;
        Ok(spawn_handler(observation, on_update))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &*self.config.read())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ErrorKind;
    use gateway_mock::MockGateway;

    fn dispatcher(gateway: &MockGateway, config: GatewayConfig) -> Dispatcher {
        Dispatcher::new(Arc::new(gateway.clone()), config, TimingProfile::default())
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_not_connected() {
        let gateway = MockGateway::new("ABC123");
        let d = dispatcher(
            &gateway,
            GatewayConfig::new("mock", "myhub-client").with_security_code("ABC123"),
        );

        assert_eq!(d.state(), DispatcherState::Unconnected);
        let err = d.get_gateway_info().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(gateway.handshake_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_connect_can_be_retried() {
        let gateway = MockGateway::new("ABC123").with_client("myhub-client", "k3y");
        let d = dispatcher(
            &gateway,
            GatewayConfig::new("mock", "myhub-client").with_psk("k3y"),
        );

        gateway.inject(gateway_mock::Fault::RejectHandshake);
        let err = d.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);
        assert_eq!(d.state(), DispatcherState::Unconnected);

        d.connect().await.unwrap();
        assert_eq!(d.state(), DispatcherState::Connected);
        // Connecting again is a no-op.
        d.connect().await.unwrap();
        assert_eq!(gateway.handshake_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_configuration_error() {
        let gateway = MockGateway::new("ABC123");
        let d = dispatcher(&gateway, GatewayConfig::new("mock", "myhub-client"));
        let err = d.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(d.state(), DispatcherState::Unconnected);
    }

    #[tokio::test]
    async fn test_finish_before_connect() {
        let gateway = MockGateway::new("ABC123");
        let d = dispatcher(
            &gateway,
            GatewayConfig::new("mock", "myhub-client").with_psk("k3y"),
        );
        let err = d.finish().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(d.state(), DispatcherState::Unconnected);

        // The dispatcher is still usable.
        d.connect().await.unwrap();
        d.finish().await.unwrap();
        assert_eq!(d.state(), DispatcherState::Finished);
    }

    #[tokio::test]
    async fn test_observing_intent_rejected_by_request() {
        let gateway = MockGateway::new("ABC123").with_client("myhub-client", "k3y");
        let d = dispatcher(
            &gateway,
            GatewayConfig::new("mock", "myhub-client").with_psk("k3y"),
        );
        d.connect().await.unwrap();
        let err = d.request(Intent::observe("/15001/1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
