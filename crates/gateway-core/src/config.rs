//! Dispatcher configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables prefixed with `DISPATCH_`, nested with `__`
//!
//! # Example
//!
//! ```toml
//! [gateway]
//! host = "192.168.1.20"
//! client_identity = "myhub-client"
//! security_code = "ABC123"
//!
//! [timing]
//! ack_timeout_secs = 0.5
//! max_retransmit = 2
//! ```
//!
//! ```no_run
//! use gateway_core::DispatcherConfig;
//!
//! let config = DispatcherConfig::load_from("config/gateway.toml")?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `DISPATCH_GATEWAY__PSK=...` overrides `gateway.psk` from the file.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::credentials::SessionCredentials;
use crate::error::{DispatchError, Result};
use crate::request::{Endpoint, DEFAULT_COAPS_PORT};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DISPATCH_";

/// Connection settings for one gateway.
///
/// Exactly one of `security_code` / `psk` is authoritative: once a derived
/// key is present the security code must not be used again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host name or IP address
    pub host: String,
    /// Secured CoAP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity this client registers and authenticates as
    pub client_identity: String,
    /// Initial security code printed on the gateway (bootstrap only)
    #[serde(default)]
    pub security_code: Option<String>,
    /// Key issued by the gateway during bootstrap
    #[serde(default)]
    pub psk: Option<String>,
}

/// Which secret a [`GatewayConfig`] will authenticate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    /// Bootstrap already completed; connect directly.
    DerivedKey(&'a str),
    /// Bootstrap must run first with this security code.
    SecurityCode(&'a str),
    /// Neither secret configured.
    Missing,
}

fn default_port() -> u16 {
    DEFAULT_COAPS_PORT
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, client_identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_COAPS_PORT,
            client_identity: client_identity.into(),
            security_code: None,
            psk: None,
        }
    }

    pub fn with_security_code(mut self, code: impl Into<String>) -> Self {
        self.security_code = Some(code.into());
        self
    }

    pub fn with_psk(mut self, psk: impl Into<String>) -> Self {
        self.psk = Some(psk.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// The derived key wins over the security code whenever both are set.
    pub fn credential_source(&self) -> CredentialSource<'_> {
        match (self.psk.as_deref(), self.security_code.as_deref()) {
            (Some(psk), _) if !psk.is_empty() => CredentialSource::DerivedKey(psk),
            (_, Some(code)) if !code.is_empty() => CredentialSource::SecurityCode(code),
            _ => CredentialSource::Missing,
        }
    }

    pub fn has_derived_key(&self) -> bool {
        matches!(self.credential_source(), CredentialSource::DerivedKey(_))
    }

    /// Record the key issued by bootstrap and retire the security code.
    pub fn apply_derived_key(&mut self, credentials: &SessionCredentials) {
        self.psk = Some(credentials.key_lossy());
        self.security_code = None;
    }

    /// Operational credentials, available once a derived key is present.
    pub fn session_credentials(&self) -> Option<SessionCredentials> {
        match self.credential_source() {
            CredentialSource::DerivedKey(psk) => Some(SessionCredentials::new(
                self.client_identity.as_bytes(),
                psk.as_bytes(),
            )),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "gateway.host must not be empty".to_string(),
            ));
        }
        if self.client_identity.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "gateway.client_identity must not be empty".to_string(),
            ));
        }
        if self.credential_source() == CredentialSource::Missing {
            return Err(DispatchError::Configuration(
                "one of gateway.security_code or gateway.psk is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_identity", &self.client_identity)
            .field("security_code", &self.security_code.as_ref().map(|_| "<redacted>"))
            .field("psk", &self.psk.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Protocol timing parameters forwarded to the transport.
///
/// Owned by the dispatcher and read-only to the transport. The dispatcher
/// never re-implements these timeouts itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingProfile {
    /// Initial acknowledgement timeout in seconds
    pub ack_timeout_secs: f64,
    /// Randomization factor applied to the acknowledgement timeout
    pub ack_random_factor: f64,
    /// Retransmissions before an exchange times out
    pub max_retransmit: u32,
    /// Maximum expected network latency in seconds
    pub max_latency_secs: f64,
    /// Window in which a piggybacked reply is expected, in milliseconds
    pub piggyback_reply_ms: u64,
    /// Transport debug verbosity
    pub debug: u8,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 0.5,
            ack_random_factor: 1.0,
            max_retransmit: 2,
            max_latency_secs: 2.0,
            piggyback_reply_ms: 10,
            debug: 0,
        }
    }
}

impl TimingProfile {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_secs_f64(self.max_latency_secs)
    }

    pub fn piggyback_window(&self) -> Duration {
        Duration::from_millis(self.piggyback_reply_ms)
    }

    /// Time from the first transmission to the last retransmission:
    /// `ack_timeout * (2^max_retransmit - 1) * ack_random_factor`.
    pub fn max_transmit_span(&self) -> Duration {
        let backoff = 2f64.powi(self.max_retransmit.min(16) as i32) - 1.0;
        Duration::from_secs_f64(self.ack_timeout_secs * backoff * self.ack_random_factor)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(DispatchError::Configuration(format!(
                    "timing.{} must be a positive number, got {}",
                    name, value
                )))
            }
        };
        positive("ack_timeout_secs", self.ack_timeout_secs)?;
        positive("max_latency_secs", self.max_latency_secs)?;
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            return Err(DispatchError::Configuration(format!(
                "timing.ack_random_factor must be >= 1.0, got {}",
                self.ack_random_factor
            )));
        }
        Ok(())
    }
}

/// Output format for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Logging settings for applications embedding the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub timing: TimingProfile,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DispatcherConfig {
    pub fn new(gateway: GatewayConfig) -> Self {
        Self {
            gateway,
            timing: TimingProfile::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file and `DISPATCH_` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract from an already assembled figment.
    pub fn from_figment(figment: Figment) -> std::result::Result<Self, figment::Error> {
        figment.extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.timing.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DispatchError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_timing_defaults() {
        let timing = TimingProfile::default();
        assert_eq!(timing.ack_timeout(), Duration::from_millis(500));
        assert_eq!(timing.max_retransmit, 2);
        assert_eq!(timing.max_latency(), Duration::from_secs(2));
        assert_eq!(timing.piggyback_window(), Duration::from_millis(10));
        // 0.5 * (2^2 - 1) * 1.0
        assert_eq!(timing.max_transmit_span(), Duration::from_millis(1500));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_timing_validation() {
        let timing = TimingProfile {
            ack_timeout_secs: 0.0,
            ..Default::default()
        };
        assert!(timing.validate().is_err());

        let timing = TimingProfile {
            ack_random_factor: 0.5,
            ..Default::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_credential_source() {
        let cfg = GatewayConfig::new("gw", "client");
        assert_eq!(cfg.credential_source(), CredentialSource::Missing);
        assert!(cfg.validate().is_err());

        let cfg = cfg.with_security_code("ABC123");
        assert_eq!(cfg.credential_source(), CredentialSource::SecurityCode("ABC123"));
        assert!(cfg.session_credentials().is_none());

        let mut cfg = cfg;
        cfg.apply_derived_key(&SessionCredentials::new("client", "derived"));
        assert_eq!(cfg.credential_source(), CredentialSource::DerivedKey("derived"));
        assert!(cfg.security_code.is_none());
        let creds = cfg.session_credentials().unwrap();
        assert_eq!(creds.identity(), b"client");
        assert_eq!(creds.key(), b"derived");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = GatewayConfig::new("gw", "client")
            .with_security_code("ABC123")
            .with_psk("topsecret");
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("ABC123"));
        assert!(!rendered.contains("topsecret"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
host = "192.168.1.20"
client_identity = "myhub-client"
security_code = "ABC123"

[timing]
max_retransmit = 4

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = DispatcherConfig::load_from(file.path()).unwrap();
        assert_eq!(config.gateway.port, DEFAULT_COAPS_PORT);
        assert_eq!(config.gateway.security_code.as_deref(), Some("ABC123"));
        assert_eq!(config.timing.max_retransmit, 4);
        assert_eq!(config.timing.ack_timeout_secs, 0.5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "gateway.toml",
                r#"
[gateway]
host = "192.168.1.20"
client_identity = "myhub-client"
security_code = "ABC123"
"#,
            )?;
            jail.set_env("DISPATCH_GATEWAY__PSK", "from-env");

            let config = DispatcherConfig::load_from("gateway.toml")?;
            assert_eq!(config.gateway.psk.as_deref(), Some("from-env"));
            assert!(config.gateway.has_derived_key());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config =
            DispatcherConfig::new(GatewayConfig::new("gw", "client").with_psk("key"));
        assert!(config.validate().is_ok());
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(DispatchError::Configuration(_))
        ));
    }
}
