//! Client database credentials held in the tenant database.
//!
//! Passwords are written sealed by [`CredentialCipher`] and only opened in
//! [`CredentialVault::resolve`], which hands back a [`ResolvedCredential`]
//! whose password is wiped on drop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attest_core::{ClientDatabaseCredential, ClientId};
use errors::AccessError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::encryption::CredentialCipher;
use crate::postgres::{bounded, db_error};

/// Connection parameters with the password decrypted.
#[derive(Clone)]
pub struct ResolvedCredential {
    pub client_id: ClientId,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub schema_version: i32,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("schema_version", &self.schema_version)
            .finish()
    }
}

/// Input for provisioning or replacing a client's credential.
pub struct NewClientCredential {
    pub client_id: ClientId,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub schema_version: i32,
}

/// Source of decrypted client credentials for the connection cache.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self, client_id: ClientId) -> Result<ResolvedCredential, AccessError>;
}

pub struct CredentialVault {
    pool: PgPool,
    cipher: Arc<CredentialCipher>,
    query_timeout: Duration,
}

const SELECT_CREDENTIAL: &str = "SELECT client_id, host, port, db_name, db_user, \
     encrypted_password, schema_version \
     FROM client_database_credentials WHERE client_id = $1";

fn credential_from_row(row: &PgRow) -> Result<ClientDatabaseCredential, AccessError> {
    let err = |e| db_error("get_credential", e);
    let port: i32 = row.try_get("port").map_err(err)?;
    let port = u16::try_from(port).map_err(|_| AccessError::Database {
        operation: "get_credential".to_string(),
        reason: format!("stored port {port} is out of range"),
    })?;

    Ok(ClientDatabaseCredential {
        client_id: ClientId::from(row.try_get::<Uuid, _>("client_id").map_err(err)?),
        host: row.try_get("host").map_err(err)?,
        port,
        database: row.try_get("db_name").map_err(err)?,
        username: row.try_get("db_user").map_err(err)?,
        encrypted_password: row.try_get("encrypted_password").map_err(err)?,
        schema_version: row.try_get("schema_version").map_err(err)?,
    })
}

impl CredentialVault {
    pub fn new(pool: PgPool, cipher: Arc<CredentialCipher>, query_timeout: Duration) -> Self {
        Self {
            pool,
            cipher,
            query_timeout,
        }
    }

    /// The stored record, password still sealed.
    pub async fn get_credential(
        &self,
        client_id: ClientId,
    ) -> Result<ClientDatabaseCredential, AccessError> {
        let fut = async {
            let row = sqlx::query(SELECT_CREDENTIAL)
                .bind(client_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("get_credential", e))?
                .ok_or_else(|| AccessError::not_found("client_credential", client_id))?;
            credential_from_row(&row)
        };
        bounded("get_credential", self.query_timeout, fut).await
    }

    pub async fn store_credential(&self, credential: NewClientCredential) -> Result<(), AccessError> {
        let sealed = self.cipher.encrypt(&credential.password)?;
        let fut = sqlx::query(
            "INSERT INTO client_database_credentials
                 (client_id, host, port, db_name, db_user, encrypted_password, schema_version)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (client_id) DO UPDATE SET
                 host = EXCLUDED.host,
                 port = EXCLUDED.port,
                 db_name = EXCLUDED.db_name,
                 db_user = EXCLUDED.db_user,
                 encrypted_password = EXCLUDED.encrypted_password,
                 schema_version = EXCLUDED.schema_version,
                 updated_at = now()",
        )
        .bind(credential.client_id.as_uuid())
        .bind(&credential.host)
        .bind(i32::from(credential.port))
        .bind(&credential.database)
        .bind(&credential.username)
        .bind(&sealed)
        .bind(credential.schema_version)
        .execute(&self.pool);
        bounded("store_credential", self.query_timeout, async {
            fut.await.map_err(|e| db_error("store_credential", e))
        })
        .await?;

        tracing::info!(client_id = %credential.client_id, "Stored client database credential");
        Ok(())
    }

    /// Replaces only the sealed password. Pools already built for the client
    /// keep using the old password until evicted from the connection cache.
    pub async fn rotate_password(
        &self,
        client_id: ClientId,
        new_password: &str,
    ) -> Result<(), AccessError> {
        let sealed = self.cipher.encrypt(new_password)?;
        let fut = sqlx::query(
            "UPDATE client_database_credentials
             SET encrypted_password = $2, updated_at = now()
             WHERE client_id = $1",
        )
        .bind(client_id.as_uuid())
        .bind(&sealed)
        .execute(&self.pool);
        let result = bounded("rotate_password", self.query_timeout, async {
            fut.await.map_err(|e| db_error("rotate_password", e))
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccessError::not_found("client_credential", client_id));
        }
        tracing::info!(client_id = %client_id, "Rotated client database password");
        Ok(())
    }

    pub async fn delete_credential(&self, client_id: ClientId) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query("DELETE FROM client_database_credentials WHERE client_id = $1")
                .bind(client_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("delete_credential", e))
        };
        let result = bounded("delete_credential", self.query_timeout, fut).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_client_ids(&self) -> Result<Vec<ClientId>, AccessError> {
        let fut = async {
            sqlx::query("SELECT client_id FROM client_database_credentials ORDER BY client_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("list_client_ids", e))
        };
        let rows = bounded("list_client_ids", self.query_timeout, fut).await?;
        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("client_id")
                    .map(ClientId::from)
                    .map_err(|e| db_error("list_client_ids", e))
            })
            .collect()
    }
}

#[async_trait]
impl CredentialSource for CredentialVault {
    async fn resolve(&self, client_id: ClientId) -> Result<ResolvedCredential, AccessError> {
        let stored = self.get_credential(client_id).await?;
        let password = self.cipher.decrypt(&stored.encrypted_password).map_err(|e| {
            tracing::error!(
                security_event = "credential_decrypt_failed",
                client_id = %client_id,
                error = %e,
                "Stored client credential failed authentication"
            );
            e
        })?;

        Ok(ResolvedCredential {
            client_id: stored.client_id,
            host: stored.host,
            port: stored.port,
            database: stored.database,
            username: stored.username,
            password,
            schema_version: stored.schema_version,
        })
    }
}
