use std::path::Path;

use anyhow::{Result, bail};
use attest_core::{ClientId, ClientRole};
use clap::Args;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use storage::{
    ClientAuthorizer, CredentialVault, NewClientCredential, TenantDirectory, TenantStore,
    initialize_client_schema,
};
use zeroize::Zeroizing;

use crate::commands::key::cipher_from;
use crate::commands::{connect_tenant, load_config};
use crate::output;
use crate::ux_error;

/// Connection parameters for one client database.
#[derive(Args, Default)]
pub struct ClientDatabaseArgs {
    #[arg(long)]
    pub db_host: Option<String>,

    #[arg(long, default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long)]
    pub db_name: Option<String>,

    #[arg(long)]
    pub db_user: Option<String>,

    #[arg(long, env = "ATTEST_CLIENT_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,
}

pub struct ClientDatabase {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Zeroizing<String>,
}

impl ClientDatabaseArgs {
    pub fn require(self) -> Result<ClientDatabase> {
        let mut missing = Vec::new();
        if self.db_host.is_none() {
            missing.push("--db-host");
        }
        if self.db_name.is_none() {
            missing.push("--db-name");
        }
        if self.db_user.is_none() {
            missing.push("--db-user");
        }
        if self.db_password.is_none() {
            missing.push("--db-password");
        }
        let (Some(host), Some(database), Some(username), Some(password)) =
            (self.db_host, self.db_name, self.db_user, self.db_password)
        else {
            bail!("missing client database arguments: {}", missing.join(", "));
        };

        Ok(ClientDatabase {
            host,
            port: self.db_port,
            database,
            username,
            password: Zeroizing::new(password),
        })
    }
}

pub(crate) async fn connect_client(db: &ClientDatabase) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .database(&db.database)
        .username(&db.username)
        .password(&db.password)
        .application_name("attest-cli");

    PgPoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .map_err(|e| {
            let err = ux_error::client_database_unreachable(&db.database, &e.to_string());
            err.display();
            anyhow::Error::new(err)
        })
}

pub(crate) fn parse_client_id(value: &str) -> Result<ClientId> {
    value.parse::<ClientId>().map_err(|_| {
        let err = ux_error::invalid_id("client", value);
        err.display();
        anyhow::Error::new(err)
    })
}

#[derive(Args)]
pub struct ProvisionClientArgs {
    /// Display name, unique across the tenant
    #[arg(long)]
    pub name: String,

    #[command(flatten)]
    pub db: ClientDatabaseArgs,

    /// Register this email as the client's point of contact
    #[arg(long)]
    pub poc_email: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub schema_version: i32,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct RotateCredentialArgs {
    #[arg(long)]
    pub client: String,

    /// New plaintext database password
    #[arg(long, env = "ATTEST_CLIENT_DB_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub async fn provision(config_path: Option<&Path>, args: ProvisionClientArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let cipher = cipher_from(&config.encryption)?;
    let db = args.db.require()?;
    let query_timeout = config.pool.query_timeout();

    let client_pool = connect_client(&db).await?;
    initialize_client_schema(&client_pool).await?;
    let client_authz = ClientAuthorizer::new(client_pool.clone(), query_timeout);
    client_authz.seed_default_roles().await?;

    let tenant = connect_tenant(&config).await?;
    tenant.initialize_schema().await?;
    let directory = TenantDirectory::new(tenant.pool().clone(), query_timeout);
    if directory.find_client(&args.name).await?.is_some() {
        bail!("a client named '{}' already exists", args.name);
    }
    let client_id = directory.register_client(&args.name).await?;

    let vault = CredentialVault::new(tenant.pool().clone(), cipher.into(), query_timeout);
    vault
        .store_credential(NewClientCredential {
            client_id,
            host: db.host.clone(),
            port: db.port,
            database: db.database.clone(),
            username: db.username.clone(),
            password: db.password,
            schema_version: args.schema_version,
        })
        .await?;

    let poc = match args.poc_email.as_deref() {
        Some(email) => {
            let user_id = directory.register_user(email, Some(client_id)).await?;
            client_authz
                .assign_role(user_id, ClientRole::PointOfContact.as_ref())
                .await?;
            Some(user_id)
        }
        None => None,
    };

    client_pool.close().await;
    tenant.close().await;
    tracing::info!(client_id = %client_id, database = %db.database, "Provisioned client");

    if args.json {
        println!(
            "{}",
            json!({
                "client_id": client_id.to_string(),
                "name": args.name,
                "database": db.database,
                "point_of_contact": poc.map(|u| u.to_string()),
            })
        );
        return Ok(());
    }

    output::header("Client provisioned");
    output::field("client_id", &client_id.to_string());
    output::field("name", &args.name);
    output::field("database", &format!("{}:{}/{}", db.host, db.port, db.database));
    if let Some(user_id) = poc {
        output::field("point_of_contact", &user_id.to_string());
    } else {
        output::hint("Pass --poc-email to register the client's point of contact");
    }
    Ok(())
}

pub async fn rotate(config_path: Option<&Path>, args: RotateCredentialArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let cipher = cipher_from(&config.encryption)?;
    let client_id = parse_client_id(&args.client)?;

    let tenant = connect_tenant(&config).await?;
    let vault = CredentialVault::new(
        tenant.pool().clone(),
        cipher.into(),
        config.pool.query_timeout(),
    );
    vault.rotate_password(client_id, &args.password).await?;
    tenant.close().await;
    tracing::info!(client_id = %client_id, "Rotated client credential");

    output::success(&format!("Rotated database password for client {client_id}"));
    output::warn("Running services keep their current pool until it is evicted or they restart");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reports_every_missing_argument() {
        let err = ClientDatabaseArgs {
            db_host: Some("localhost".into()),
            ..ClientDatabaseArgs::default()
        }
        .require()
        .err()
        .unwrap();
        let message = err.to_string();
        assert!(message.contains("--db-name"));
        assert!(message.contains("--db-user"));
        assert!(message.contains("--db-password"));
        assert!(!message.contains("--db-host"));
    }

    #[test]
    fn test_require_accepts_complete_arguments() {
        let db = ClientDatabaseArgs {
            db_host: Some("db.internal".into()),
            db_port: 6432,
            db_name: Some("client_acme".into()),
            db_user: Some("acme".into()),
            db_password: Some("s3cret".into()),
        }
        .require()
        .unwrap();
        assert_eq!(db.port, 6432);
        assert_eq!(db.database, "client_acme");
        assert_eq!(db.password.as_str(), "s3cret");
    }

    #[test]
    fn test_parse_client_id() {
        let id = ClientId::generate();
        assert_eq!(parse_client_id(&id.to_string()).unwrap(), id);
        assert!(parse_client_id("acme").is_err());
    }
}
