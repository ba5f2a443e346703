//! Request and response data model.
//!
//! A [`RequestDescriptor`] is created per call, is immutable and is consumed
//! once by the transport. A [`ResponseOutcome`] is what a successfully
//! classified exchange resolves with; error classes are carried by
//! [`DispatchError`](crate::DispatchError) instead.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{DispatchError, Result};

/// Default port for CoAP over DTLS.
pub const DEFAULT_COAPS_PORT: u16 = 5684;

/// Request method classes understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Fetch a resource representation (CoAP GET).
    Read,
    /// Update a resource (CoAP PUT).
    Write,
    /// The credential-derivation write (CoAP POST).
    BootstrapWrite,
}

impl Method {
    /// CoAP method name on the wire.
    pub fn as_coap(self) -> &'static str {
        match self {
            Method::Read => "GET",
            Method::Write => "PUT",
            Method::BootstrapWrite => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_coap())
    }
}

/// The gateway's fixed secured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Full `coaps://` URI for a resource path.
    pub fn uri(&self, path: &str) -> String {
        format!("coaps://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One outgoing exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Resource path, e.g. `/15001/65536`.
    pub path: String,
    /// `coaps://host:port/path` form of the target.
    pub uri: String,
    pub payload: Option<Value>,
    pub observe: bool,
}

impl RequestDescriptor {
    pub fn new(endpoint: &Endpoint, method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            uri: endpoint.uri(&path),
            path,
            payload: None,
            observe: false,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn observing(mut self) -> Self {
        self.observe = true;
        self
    }

    /// Serialized JSON body, empty when the request carries no payload.
    pub fn encode_payload(&self) -> Result<Bytes> {
        match &self.payload {
            Some(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(DispatchError::Encode),
            None => Ok(Bytes::new()),
        }
    }
}

/// A successfully classified exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The gateway returned a decodable, non-empty payload.
    Success(Value),
    /// The gateway acknowledged with a status code only.
    StatusOnly(String),
}

impl ResponseOutcome {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            ResponseOutcome::Success(value) => Some(value),
            ResponseOutcome::StatusOnly(_) => None,
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            ResponseOutcome::Success(_) => None,
            ResponseOutcome::StatusOnly(code) => Some(code),
        }
    }

    /// The payload, or [`DispatchError::EmptyResponse`] for `path` if the
    /// gateway only acknowledged.
    pub fn into_payload(self, path: &str) -> Result<Value> {
        match self {
            ResponseOutcome::Success(value) => Ok(value),
            ResponseOutcome::StatusOnly(_) => Err(DispatchError::EmptyResponse {
                path: path.to_string(),
            }),
        }
    }
}
