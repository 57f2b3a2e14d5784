//! # Configuration Precedence
//!
//! Builds the effective configuration from layered sources.
//!
//! # Precedence Order
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)

use crate::config::Config;
use crate::file_loader::{ConfigFileError, load_from_file};
use crate::loader::{EnvError, apply_env_overrides};
use std::path::Path;
use validator::Validate;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Configuration is invalid: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Resolve the effective configuration and validate it.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_layered;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_layered(Some(Path::new("attest.toml")))?;
///     println!("probe timeout: {:?}", config.pool.probe_timeout());
///     Ok(())
/// }
/// ```
pub fn load_layered(path: Option<&Path>) -> Result<Config, ConfigLoadError> {
    let mut config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            load_from_file(path)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;

    tracing::debug!(
        min_connections = config.pool.min_connections,
        max_connections = config.pool.max_connections,
        probe_timeout_ms = config.pool.probe_timeout_ms,
        encryption_key_set = config.encryption.key.is_some(),
        "Configuration resolved"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pool]\nmax_connections = 4\nmin_connections = 2").unwrap();

        unsafe {
            env::set_var("ATTEST_CLIENT_POOL_MAX", "12");
        }

        let config = load_layered(Some(file.path())).unwrap();
        assert_eq!(config.pool.max_connections, 12);
        assert_eq!(config.pool.min_connections, 2);

        unsafe {
            env::remove_var("ATTEST_CLIENT_POOL_MAX");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_result_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pool]\nmax_connections = 2\nmin_connections = 5").unwrap();

        let result = load_layered(Some(file.path()));
        assert!(matches!(result, Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let config = load_layered(None).unwrap();
        assert_eq!(config, Config::default());
    }
}
