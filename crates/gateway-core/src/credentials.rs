//! PSK-style session credentials.

use std::fmt;

/// Identity and secret key authenticating a secured session.
///
/// Derived from [`GatewayConfig`](crate::GatewayConfig) at connect time and
/// owned by the session handle for its lifetime. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    identity: Vec<u8>,
    key: Vec<u8>,
}

impl SessionCredentials {
    pub fn new(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            identity: identity.into(),
            key: key.into(),
        }
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Identity rendered as text for logging.
    pub fn identity_lossy(&self) -> String {
        String::from_utf8_lossy(&self.identity).into_owned()
    }

    /// Key rendered as text, for handing back to callers that persist it.
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("identity", &self.identity_lossy())
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let creds = SessionCredentials::new("myhub-client", "s3cr3t-key");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("myhub-client"));
        assert!(!rendered.contains("s3cr3t-key"));
        assert_eq!(creds.key(), b"s3cr3t-key");
    }
}
