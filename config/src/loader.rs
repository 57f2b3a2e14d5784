//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles. All variables share the `ATTEST_` prefix.
//!
//! ### Tenant database
//! - `ATTEST_TENANT_DB_HOST`, `ATTEST_TENANT_DB_PORT`, `ATTEST_TENANT_DB_NAME`
//! - `ATTEST_TENANT_DB_USER`, `ATTEST_TENANT_DB_PASSWORD`
//! - `ATTEST_TENANT_DB_POOL_SIZE`, `ATTEST_TENANT_DB_TIMEOUT_SECONDS`
//!
//! ### Client pools
//! - `ATTEST_CLIENT_POOL_MIN`, `ATTEST_CLIENT_POOL_MAX`
//! - `ATTEST_CLIENT_POOL_PROBE_TIMEOUT_MS`
//! - `ATTEST_CLIENT_POOL_ACQUIRE_TIMEOUT_SECONDS`
//! - `ATTEST_CLIENT_POOL_IDLE_TIMEOUT_SECONDS`
//! - `ATTEST_QUERY_TIMEOUT_MS`
//!
//! ### Secrets and auth
//! - `ATTEST_ENCRYPTION_KEY`: 32 raw bytes or base64 of 32 bytes
//! - `ATTEST_JWT_SECRET`, `ATTEST_JWT_ISSUER`, `ATTEST_JWT_AUDIENCE`,
//!   `ATTEST_JWT_LEEWAY_SECONDS`
//!
//! ### Observability
//! - `ATTEST_LOG_LEVEL`, `ATTEST_METRICS_ENABLED`

use crate::config::Config;
use std::env;

/// Errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Load configuration from environment variables on top of the defaults.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("client pool ceiling: {}", config.pool.max_connections);
///     Ok(())
/// }
/// ```
pub fn load_from_env() -> Result<Config, EnvError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overwrite fields of `config` for every `ATTEST_*` variable that is set.
///
/// Unset variables leave the existing value untouched; set but unparsable
/// variables are an error rather than being silently ignored.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), EnvError> {
    let db = &mut config.tenant_database;
    override_string("ATTEST_TENANT_DB_HOST", &mut db.host);
    override_parsed("ATTEST_TENANT_DB_PORT", &mut db.port)?;
    override_string("ATTEST_TENANT_DB_NAME", &mut db.database);
    override_string("ATTEST_TENANT_DB_USER", &mut db.username);
    override_string("ATTEST_TENANT_DB_PASSWORD", &mut db.password);
    override_parsed("ATTEST_TENANT_DB_POOL_SIZE", &mut db.pool_size)?;
    override_parsed("ATTEST_TENANT_DB_TIMEOUT_SECONDS", &mut db.timeout_seconds)?;

    let pool = &mut config.pool;
    override_parsed("ATTEST_CLIENT_POOL_MIN", &mut pool.min_connections)?;
    override_parsed("ATTEST_CLIENT_POOL_MAX", &mut pool.max_connections)?;
    override_parsed("ATTEST_CLIENT_POOL_PROBE_TIMEOUT_MS", &mut pool.probe_timeout_ms)?;
    override_parsed(
        "ATTEST_CLIENT_POOL_ACQUIRE_TIMEOUT_SECONDS",
        &mut pool.acquire_timeout_seconds,
    )?;
    override_parsed(
        "ATTEST_CLIENT_POOL_IDLE_TIMEOUT_SECONDS",
        &mut pool.idle_timeout_seconds,
    )?;
    override_parsed("ATTEST_QUERY_TIMEOUT_MS", &mut pool.query_timeout_ms)?;

    if let Ok(key) = env::var("ATTEST_ENCRYPTION_KEY") {
        config.encryption.key = Some(key);
    }

    let auth = &mut config.auth;
    if let Ok(secret) = env::var("ATTEST_JWT_SECRET") {
        auth.jwt_secret = Some(secret);
    }
    override_string("ATTEST_JWT_ISSUER", &mut auth.issuer);
    override_string("ATTEST_JWT_AUDIENCE", &mut auth.audience);
    override_parsed("ATTEST_JWT_LEEWAY_SECONDS", &mut auth.leeway_seconds)?;

    let obs = &mut config.observability;
    override_string("ATTEST_LOG_LEVEL", &mut obs.logging_level);
    if let Some(enabled) = parse_bool("ATTEST_METRICS_ENABLED")? {
        obs.metrics_enabled = enabled;
    }

    Ok(())
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn override_parsed<T>(key: &str, target: &mut T) -> Result<(), EnvError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = parse_env(key)? {
        *target = value;
    }
    Ok(())
}

fn parse_env<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(s) => s.trim().parse::<T>().map(Some).map_err(|e| EnvError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

fn parse_bool(key: &str) -> Result<Option<bool>, EnvError> {
    match env::var(key) {
        Ok(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            other => Err(EnvError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got {other:?}"),
            }),
        },
        Err(_) => Ok(None),
    }
}
