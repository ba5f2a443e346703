//! `gateway-client`
//!
//! Throttled secure command dispatcher for a constrained CoAP/DTLS lighting
//! gateway.
//!
//! The gateway can only handle one exchange at a time, so every request goes
//! through a single-slot lane of a [`RequestThrottle`](gateway_throttle::RequestThrottle)
//! before it reaches the [`SecureSession`]. Results come back classified as a
//! [`ResponseOutcome`](gateway_core::ResponseOutcome) or a
//! [`DispatchError`](gateway_core::DispatchError).
//!
//! ## Modules
//!
//! - [`command`]: resource paths, attribute IDs and payload shapes
//! - [`classify`]: response classification
//! - [`session`]: the secure session handle
//! - [`bootstrap`](mod@bootstrap): security code to client key exchange
//! - [`observe`]: push updates as a `Stream`
//! - [`dispatcher`]: the [`Dispatcher`] facade and its lifecycle

pub mod bootstrap;
pub mod classify;
pub mod command;
pub mod dispatcher;
pub mod observe;
pub mod session;

pub use bootstrap::bootstrap;
pub use command::{Intent, LightState, DEFAULT_TRANSITION_TIME};
pub use dispatcher::{Dispatcher, DispatcherState, REQUEST_CATEGORY};
pub use observe::{Observation, ObservationHandle};
pub use session::SecureSession;
