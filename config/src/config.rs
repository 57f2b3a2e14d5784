//! # Configuration Structures
//!
//! All configuration structures for the Attest data-access core.
//!
//! Every structure:
//! - Uses `serde` defaults so partial files and sparse environments work
//! - Uses `validator` for range and format checks
//! - Redacts secrets in its `Debug` output

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};
use zeroize::Zeroizing;

/// Width of the credential encryption key (AES-256).
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Top-level configuration.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("client pool ceiling: {}", config.pool.max_connections);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Central tenant database holding credentials and tenant RBAC
    #[serde(default)]
    #[validate(nested)]
    pub tenant_database: TenantDatabaseConfig,

    /// Per-client pool sizing and liveness probing
    #[serde(default)]
    #[validate(nested)]
    pub pool: ClientPoolConfig,

    /// Credential encryption key
    #[serde(default)]
    #[validate(nested)]
    pub encryption: EncryptionConfig,

    /// Token validation settings
    #[serde(default)]
    #[validate(nested)]
    pub auth: AuthConfig,

    /// Logging and metrics
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

/// Connection settings for the central tenant database.
#[derive(Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TenantDatabaseConfig {
    #[serde(default = "default_tenant_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    #[serde(default = "default_tenant_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_tenant_database")]
    #[validate(length(min = 1, max = 63))]
    pub database: String,

    #[serde(default = "default_tenant_username")]
    #[validate(length(min = 1, max = 63))]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Maximum connections to the tenant database
    #[serde(default = "default_tenant_pool_size")]
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_tenant_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64,
}

fn default_tenant_host() -> String {
    "localhost".to_string()
}

fn default_tenant_port() -> u16 {
    5432
}

fn default_tenant_database() -> String {
    "attest_tenant".to_string()
}

fn default_tenant_username() -> String {
    "postgres".to_string()
}

fn default_tenant_pool_size() -> u32 {
    10
}

fn default_tenant_timeout() -> u64 {
    30
}

impl Default for TenantDatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_tenant_host(),
            port: default_tenant_port(),
            database: default_tenant_database(),
            username: default_tenant_username(),
            password: String::new(),
            pool_size: default_tenant_pool_size(),
            timeout_seconds: default_tenant_timeout(),
        }
    }
}

impl fmt::Debug for TenantDatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl TenantDatabaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Bounds applied to every client connection pool.
///
/// A small minimum stays warm; the maximum caps what one client can consume.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct ClientPoolConfig {
    #[serde(default = "default_min_connections")]
    #[validate(range(max = 50))]
    pub min_connections: u32,

    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 200))]
    pub max_connections: u32,

    /// Budget for the `SELECT 1` probe run before a pool is cached
    #[serde(default = "default_probe_timeout_ms")]
    #[validate(range(min = 50, max = 60_000))]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_acquire_timeout_seconds")]
    #[validate(range(min = 1, max = 300))]
    pub acquire_timeout_seconds: u64,

    #[serde(default = "default_idle_timeout_seconds")]
    #[validate(range(min = 1, max = 86_400))]
    pub idle_timeout_seconds: u64,

    /// Upper bound on a single authorization or workflow query
    #[serde(default = "default_query_timeout_ms")]
    #[validate(range(min = 50, max = 300_000))]
    pub query_timeout_ms: u64,
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

fn default_idle_timeout_seconds() -> u64 {
    600
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn validate_pool_bounds(pool: &ClientPoolConfig) -> Result<(), ValidationError> {
    if pool.min_connections > pool.max_connections {
        return Err(ValidationError::new("min_connections exceeds max_connections"));
    }
    Ok(())
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            probe_timeout_ms: default_probe_timeout_ms(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl ClientPoolConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Errors decoding the configured encryption key.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Encryption key is not configured")]
    Missing,

    #[error("Encryption key must be 32 bytes or their base64 encoding, got {length} bytes")]
    InvalidLength { length: usize },
}

/// Credential encryption key.
///
/// Accepts either exactly 32 raw bytes or the standard base64 encoding of 32
/// bytes.
#[derive(Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct EncryptionConfig {
    #[serde(default)]
    #[validate(custom(function = "validate_encryption_key"))]
    pub key: Option<String>,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn validate_encryption_key(value: &str) -> Result<(), ValidationError> {
    decode_key(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_encryption_key"))
}

fn decode_key(value: &str) -> Result<Zeroizing<[u8; ENCRYPTION_KEY_LEN]>, KeyError> {
    let raw = value.as_bytes();
    let bytes = if raw.len() == ENCRYPTION_KEY_LEN {
        Zeroizing::new(raw.to_vec())
    } else {
        let decoded = general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|_| KeyError::InvalidLength { length: raw.len() })?;
        Zeroizing::new(decoded)
    };

    let key: [u8; ENCRYPTION_KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength {
            length: bytes.len()
        })?;
    Ok(Zeroizing::new(key))
}

impl EncryptionConfig {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    /// Decodes the configured key into its 32 raw bytes.
    pub fn key_bytes(&self) -> Result<Zeroizing<[u8; ENCRYPTION_KEY_LEN]>, KeyError> {
        let value = self.key.as_deref().ok_or(KeyError::Missing)?;
        decode_key(value)
    }
}

/// Settings for the bundled HS256 token validator.
#[derive(Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AuthConfig {
    #[serde(default)]
    #[validate(length(min = 32))]
    pub jwt_secret: Option<String>,

    #[serde(default = "default_issuer")]
    #[validate(length(min = 1, max = 255))]
    pub issuer: String,

    #[serde(default = "default_audience")]
    #[validate(length(min = 1, max = 255))]
    pub audience: String,

    /// Clock skew tolerated when checking `exp`/`nbf`
    #[serde(default = "default_leeway_seconds")]
    #[validate(range(max = 300))]
    pub leeway_seconds: u64,
}

fn default_issuer() -> String {
    "attest".to_string()
}

fn default_audience() -> String {
    "attest-api".to_string()
}

fn default_leeway_seconds() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: default_issuer(),
            audience: default_audience(),
            leeway_seconds: default_leeway_seconds(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn validate_logging_level(value: &str) -> Result<(), ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_logging_level")),
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging_level: default_logging_level(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}
