//! Error types for the gateway dispatcher.
//!
//! `DispatchError` is the single error type surfaced to callers of the
//! dispatcher. Every failure carries one classified kind and none is retried
//! above the transport's own retransmission.
//!
//! ## Error Categories
//!
//! 1. **Lifecycle** - `ConnectFailed`, `ConnectInProgress`, `BootstrapFailed`,
//!    `NotConnected`, `SessionClosed`
//!    - `ConnectFailed` may be retried by calling `connect` again
//!    - `BootstrapFailed` never falls back to the initial security code
//! 2. **Exchange** - `Application`, `Transport`, `EmptyResponse`, `Decode`,
//!    `ConcurrentExchange`
//!    - `Application` carries the gateway's 4.xx/5.xx status code
//!    - `Transport` wraps timeouts, retransmit exhaustion and network errors
//! 3. **Scheduling** - `ThrottleAborted`, `UnknownCategory`
//! 4. **Configuration** - `Config`, `Configuration`, `Encode`

use gateway_throttle::ThrottleError;
use thiserror::Error;

use crate::transport::TransportError;

/// Convenience alias for results using the dispatcher error type.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Flat classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectFailed,
    BootstrapFailed,
    Application,
    Transport,
    EmptyResponse,
    ThrottleAborted,
    NotConnected,
    SessionClosed,
    ConcurrentExchange,
    Configuration,
    Decode,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::ConnectFailed => "connect_failed",
            ErrorKind::BootstrapFailed => "bootstrap_failed",
            ErrorKind::Application => "application",
            ErrorKind::Transport => "transport",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::ThrottleAborted => "throttle_aborted",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::SessionClosed => "session_closed",
            ErrorKind::ConcurrentExchange => "concurrent_exchange",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Decode => "decode",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the gateway dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The secured channel could not be established.
    #[error("Connect to gateway failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// `connect` was called while another connect was still running.
    #[error("A connect attempt is already in progress")]
    ConnectInProgress,

    /// The credential exchange was rejected or returned no key.
    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// The gateway answered with an error-class status code.
    #[error("Gateway rejected {path} with status {code}")]
    Application { code: String, path: String },

    /// Timeout, retransmit exhaustion or network error mid-exchange.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The exchange resolved with neither a payload nor a status.
    #[error("Empty response from {path}")]
    EmptyResponse { path: String },

    /// A queued request was discarded before it was granted.
    #[error("Request discarded before dispatch (throttle aborted)")]
    ThrottleAborted,

    /// A facade operation was invoked before `connect` completed.
    #[error("Dispatcher is not connected")]
    NotConnected,

    /// The session was finished or closed.
    #[error("Session is closed")]
    SessionClosed,

    /// A second exchange was started while one was still in flight.
    #[error("An exchange is already in flight on this session")]
    ConcurrentExchange,

    /// No throttle lane is registered under this category.
    #[error("Unknown throttle category: {0}")]
    UnknownCategory(String),

    /// Semantic configuration error (values parse but are unusable).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file or environment could not be loaded.
    #[error("Configuration load error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Response payload was not valid JSON of the expected shape.
    #[error("Failed to decode payload from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Request payload could not be serialized.
    #[error("Failed to encode request payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<figment::Error> for DispatchError {
    fn from(err: figment::Error) -> Self {
        DispatchError::Config(Box::new(err))
    }
}

impl From<ThrottleError> for DispatchError {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::Aborted => DispatchError::ThrottleAborted,
            ThrottleError::UnknownCategory(category) => DispatchError::UnknownCategory(category),
            other => DispatchError::Configuration(other.to_string()),
        }
    }
}

impl DispatchError {
    /// Flat classification used by callers that branch on failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::ConnectFailed(_) | DispatchError::ConnectInProgress => {
                ErrorKind::ConnectFailed
            }
            DispatchError::BootstrapFailed(_) => ErrorKind::BootstrapFailed,
            DispatchError::Application { .. } => ErrorKind::Application,
            DispatchError::Transport(_) => ErrorKind::Transport,
            DispatchError::EmptyResponse { .. } => ErrorKind::EmptyResponse,
            DispatchError::ThrottleAborted => ErrorKind::ThrottleAborted,
            DispatchError::NotConnected => ErrorKind::NotConnected,
            DispatchError::SessionClosed => ErrorKind::SessionClosed,
            DispatchError::ConcurrentExchange => ErrorKind::ConcurrentExchange,
            DispatchError::UnknownCategory(_)
            | DispatchError::Configuration(_)
            | DispatchError::Config(_)
            | DispatchError::Encode(_) => ErrorKind::Configuration,
            DispatchError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// Whether the caller may reasonably retry the failed operation as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectFailed
                | ErrorKind::Application
                | ErrorKind::Transport
                | ErrorKind::ThrottleAborted
        )
    }

    /// The gateway status code, for application errors.
    pub fn status_code(&self) -> Option<&str> {
        match self {
            DispatchError::Application { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = DispatchError::Application {
            code: "4.04".to_string(),
            path: "/15001/1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(err.status_code(), Some("4.04"));
        assert!(err.is_retriable());

        let err = DispatchError::from(TransportError::Timeout { retransmits: 2 });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retriable());

        assert_eq!(DispatchError::SessionClosed.kind(), ErrorKind::SessionClosed);
        assert!(!DispatchError::SessionClosed.is_retriable());
        assert!(!DispatchError::BootstrapFailed("rejected".into()).is_retriable());
        assert_eq!(DispatchError::ConnectInProgress.kind(), ErrorKind::ConnectFailed);
    }

    #[test]
    fn test_error_messages() {
        let err = DispatchError::Application {
            code: "4.05".to_string(),
            path: "/15004/7".to_string(),
        };
        assert_eq!(err.to_string(), "Gateway rejected /15004/7 with status 4.05");

        let err = DispatchError::EmptyResponse {
            path: "/15011/15012".to_string(),
        };
        assert_eq!(err.to_string(), "Empty response from /15011/15012");
        assert_eq!(ErrorKind::ThrottleAborted.to_string(), "throttle_aborted");
    }

    #[test]
    fn test_throttle_error_conversion() {
        let err = DispatchError::from(ThrottleError::Aborted);
        assert!(matches!(err, DispatchError::ThrottleAborted));

        let err = DispatchError::from(ThrottleError::UnknownCategory("bulk".into()));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "Unknown throttle category: bulk");

        let err = DispatchError::from(ThrottleError::NoRuntime);
        assert!(matches!(err, DispatchError::Configuration(_)));
    }
}
