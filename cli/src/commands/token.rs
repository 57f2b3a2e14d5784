use std::path::Path;

use anyhow::Result;
use attest_core::UserId;
use clap::Args;
use context::JwtTokenValidator;

use crate::commands::load_config;
use crate::ux_error;

#[derive(Args)]
pub struct IssueTokenArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub email: String,

    /// Lifetime in minutes
    #[arg(long, default_value_t = 60)]
    pub ttl_minutes: i64,
}

pub fn run(config_path: Option<&Path>, args: IssueTokenArgs) -> Result<()> {
    let config = load_config(config_path)?;
    if config.auth.jwt_secret.is_none() {
        let err = ux_error::jwt_secret_missing();
        err.display();
        return Err(err.into());
    }

    let user_id = args.user.parse::<UserId>().map_err(|_| {
        let err = ux_error::invalid_id("user", &args.user);
        err.display();
        anyhow::Error::new(err)
    })?;

    let validator = JwtTokenValidator::from_config(&config.auth)?;
    let token = validator.issue(user_id, &args.email, chrono::Duration::minutes(args.ttl_minutes))?;
    println!("{token}");
    Ok(())
}
