pub mod client;
pub mod key;
pub mod permission;
pub mod schema;
pub mod token;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use storage::TenantDatabase;

use crate::ux_error;

#[derive(Parser)]
#[command(
    name = "attest",
    author,
    version,
    about = "Attest - tenant and client database administration",
    long_about = "Provision client databases, manage sealed credentials and inspect \
                  permissions.\n\nSettings come from ATTEST_* environment variables, \
                  optionally layered over a TOML file passed with --config."
)]
pub struct Cli {
    #[arg(long, global = true, env = "ATTEST_CONFIG", help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Generate a fresh credential encryption key")]
    GenerateKey(key::GenerateKeyArgs),

    #[command(about = "Encrypt a client database password for storage")]
    EncryptPassword(key::EncryptPasswordArgs),

    #[command(about = "Create tenant or client tables (idempotent)")]
    InitSchema(schema::InitSchemaArgs),

    #[command(about = "Register a client and seal its database credential")]
    ProvisionClient(client::ProvisionClientArgs),

    #[command(about = "Replace a client's stored database password")]
    RotateCredential(client::RotateCredentialArgs),

    #[command(about = "Check whether a user holds a permission")]
    CheckPermission(permission::CheckPermissionArgs),

    #[command(about = "Issue a signed bearer token for a user")]
    IssueToken(token::IssueTokenArgs),
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    config::load_layered(path).map_err(|e| {
        let err = ux_error::config_invalid(&e.to_string());
        err.display();
        anyhow::Error::new(err)
    })
}

pub(crate) async fn connect_tenant(config: &Config) -> Result<TenantDatabase> {
    TenantDatabase::connect(&config.tenant_database)
        .await
        .map_err(|e| {
            let err = ux_error::tenant_database_unreachable(
                &config.tenant_database.host,
                config.tenant_database.port,
                &e.to_string(),
            );
            err.display();
            anyhow::Error::new(err)
        })
}
