//! # Configuration File Loading
//!
//! Loads configuration from TOML files.

use crate::config::Config;
use std::path::Path;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),
}

/// Load configuration from a TOML file.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_toml(Path::new("attest.toml"))?;
///     println!("tenant database: {}", config.tenant_database.host);
///     Ok(())
/// }
/// ```
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))
}

/// Load configuration from file, checking the extension first.
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => load_from_toml(path),
        Some(other) => Err(ConfigFileError::UnsupportedFormat(other.to_string())),
        None => Err(ConfigFileError::UnsupportedFormat(String::new())),
    }
}
