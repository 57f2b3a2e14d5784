use std::path::Path;

use anyhow::Result;
use clap::{Args, ValueEnum};
use storage::{ClientAuthorizer, initialize_client_schema};

use crate::commands::{client, connect_tenant, load_config};
use crate::output;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SchemaTarget {
    Tenant,
    Client,
}

#[derive(Args)]
pub struct InitSchemaArgs {
    #[arg(long, value_enum, default_value = "tenant")]
    pub target: SchemaTarget,

    #[command(flatten)]
    pub client_db: client::ClientDatabaseArgs,
}

pub async fn run(config_path: Option<&Path>, args: InitSchemaArgs) -> Result<()> {
    let config = load_config(config_path)?;

    match args.target {
        SchemaTarget::Tenant => {
            let tenant = connect_tenant(&config).await?;
            tenant.initialize_schema().await?;
            tenant.close().await;
            output::success(&format!(
                "Tenant schema ready in '{}'",
                config.tenant_database.database
            ));
        }
        SchemaTarget::Client => {
            let db = args.client_db.require()?;
            let pool = client::connect_client(&db).await?;
            initialize_client_schema(&pool).await?;
            ClientAuthorizer::new(pool.clone(), config.pool.query_timeout())
                .seed_default_roles()
                .await?;
            pool.close().await;
            output::success(&format!("Client schema ready in '{}'", db.database));
        }
    }
    Ok(())
}
