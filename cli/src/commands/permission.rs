use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use attest_core::UserId;
use clap::Args;
use serde_json::json;
use storage::{
    ClientAuthorizer, CredentialVault, PermissionResolver, PgClientPoolCache, TenantAuthorizer,
    TenantStore,
};

use crate::commands::client::parse_client_id;
use crate::commands::key::cipher_from;
use crate::commands::{connect_tenant, load_config};
use crate::output;
use crate::ux_error;

#[derive(Args)]
pub struct CheckPermissionArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub permission: String,

    /// Check the client tier of this client instead of the tenant tier
    #[arg(long)]
    pub client: Option<String>,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

pub async fn run(config_path: Option<&Path>, args: CheckPermissionArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let user_id = args.user.parse::<UserId>().map_err(|_| {
        let err = ux_error::invalid_id("user", &args.user);
        err.display();
        anyhow::Error::new(err)
    })?;
    let query_timeout = config.pool.query_timeout();
    let tenant = connect_tenant(&config).await?;

    let (granted, role, tier) = match args.client.as_deref() {
        None => {
            let authz = TenantAuthorizer::new(tenant.pool().clone(), query_timeout);
            let granted = authz.has_permission(user_id, &args.permission).await?;
            (granted, authz.role(user_id).await?, "tenant".to_string())
        }
        Some(raw) => {
            let client_id = parse_client_id(raw)?;
            let cipher = cipher_from(&config.encryption)?;
            let vault = Arc::new(CredentialVault::new(
                tenant.pool().clone(),
                Arc::new(cipher),
                query_timeout,
            ));
            let cache = PgClientPoolCache::from_config(&config.pool, vault);
            let pool = cache.get_pool(client_id).await?;
            let authz = ClientAuthorizer::new(pool, query_timeout);
            let granted = authz.has_permission(user_id, &args.permission).await?;
            let role = authz.role(user_id).await?;
            cache.close().await;
            (granted, role, format!("client {client_id}"))
        }
    };
    tenant.close().await;

    if args.json {
        println!(
            "{}",
            json!({
                "user_id": user_id.to_string(),
                "permission": args.permission,
                "tier": tier,
                "granted": granted,
                "role": role,
            })
        );
    } else {
        let role = role.as_deref().unwrap_or("(none)");
        if granted {
            output::success(&format!(
                "{user_id} holds '{}' on {tier} (role: {role})",
                args.permission
            ));
        } else {
            output::denied(&format!(
                "{user_id} lacks '{}' on {tier} (role: {role})",
                args.permission
            ));
        }
    }

    if !granted {
        std::process::exit(1);
    }
    Ok(())
}
