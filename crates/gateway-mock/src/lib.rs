//! Simulated lighting gateway for testing the dispatcher without hardware.
//!
//! [`MockGateway`] implements the [`gateway_core::Transport`] boundary with an
//! in-memory resource tree. All timing uses `tokio::time`, so tests running
//! with a paused clock see retransmission timeouts and latency instantly.
//!
//! # Behavior
//!
//! - Sessions authenticated as `Client_identity` with the printed security
//!   code may only POST to the bootstrap resource, which issues a key
//! - Sessions authenticated with an issued key may GET and PUT resources
//! - GET on `/15001`, `/15004` and `/15005/{group}` lists child identifiers
//! - PUT merges the payload into the stored representation and pushes the
//!   result to observers of that path
//!
//! # Test hooks
//!
//! - [`Fault`]: one-shot handshake failures, timeouts, empty responses,
//!   status codes and disconnects
//! - [`MockGateway::set_status`]: persistent per-path status override
//! - [`MockGateway::requests`], [`MockGateway::bootstrap_count`] and
//!   [`MockGateway::max_concurrent_exchanges`] for assertions

mod channel;
mod faults;
mod gateway;
mod resources;

pub use faults::Fault;
pub use gateway::{MockGateway, RecordedRequest, BOOTSTRAP_IDENTITY, BOOTSTRAP_PATH, GATEWAY_PATH};
