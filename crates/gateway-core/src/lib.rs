//! `gateway-core`
//!
//! Core types shared by the gateway dispatcher crates.
//!
//! This crate owns everything that is not protocol-shape knowledge and not
//! scheduling: the data model exchanged between the dispatcher and the
//! secured transport, the error taxonomy, configuration loading and the
//! tracing bootstrap used by applications embedding the dispatcher.
//!
//! ## Layers
//!
//! - **Transport** ([`transport`]): the opaque secured-datagram agent, consumed
//!   through the [`Transport`] and [`Channel`] traits
//! - **Requests** ([`request`]): [`RequestDescriptor`] going out and
//!   [`ResponseOutcome`] coming back
//! - **Configuration** ([`config`]): [`GatewayConfig`], [`TimingProfile`] and the
//!   figment-backed [`DispatcherConfig`]
//! - **Errors** ([`error`]): [`DispatchError`] with its flat [`ErrorKind`]

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod request;
pub mod transport;

pub use config::{
    CredentialSource, DispatcherConfig, GatewayConfig, LogFormat, LoggingConfig, TimingProfile,
};
pub use credentials::SessionCredentials;
pub use error::{DispatchError, ErrorKind, Result};
pub use request::{Endpoint, Method, RequestDescriptor, ResponseOutcome, DEFAULT_COAPS_PORT};
pub use transport::{Channel, RawResponse, Transport, TransportError, UpdateStream};
