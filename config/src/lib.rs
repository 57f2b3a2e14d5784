//! # Configuration System
//!
//! Centralized configuration for the Attest data-access core.
//!
//! This crate provides:
//! - Configuration structures for the tenant database, client pools,
//!   credential encryption, token validation, and observability
//! - Environment variable loading (12-factor app principles)
//! - TOML file loading
//! - Layered precedence (env > file > defaults) with validation
//!
//! # Best Practices
//!
//! - Uses `validator` crate for input validation
//! - Secrets are redacted from `Debug` output

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod precedence;

pub use config::{
    AuthConfig, ClientPoolConfig, Config, ENCRYPTION_KEY_LEN, EncryptionConfig, KeyError,
    ObservabilityConfig, TenantDatabaseConfig,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml};
pub use loader::{EnvError, apply_env_overrides, load_from_env};
pub use precedence::{ConfigLoadError, load_layered};
pub use validator::Validate;
