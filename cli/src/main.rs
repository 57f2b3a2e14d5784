use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;
pub mod ux_error;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::GenerateKey(args) => commands::key::generate(args),
        Commands::EncryptPassword(args) => commands::key::encrypt_password(config_path, args),
        Commands::InitSchema(args) => commands::schema::run(config_path, args).await,
        Commands::ProvisionClient(args) => commands::client::provision(config_path, args).await,
        Commands::RotateCredential(args) => commands::client::rotate(config_path, args).await,
        Commands::CheckPermission(args) => commands::permission::run(config_path, args).await,
        Commands::IssueToken(args) => commands::token::run(config_path, args),
    }
}
