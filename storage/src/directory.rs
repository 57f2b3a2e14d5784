use std::time::Duration;

use async_trait::async_trait;
use attest_core::{ClientId, TenantUser, UserId};
use errors::AccessError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::postgres::{bounded, db_error};

/// Resolves which client, if any, a platform user belongs to.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn client_for_user(&self, user_id: UserId) -> Result<Option<ClientId>, AccessError>;
}

/// Clients and platform users recorded in the tenant database.
#[derive(Clone)]
pub struct TenantDirectory {
    pool: PgPool,
    query_timeout: Duration,
}

impl TenantDirectory {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn register_client(&self, name: &str) -> Result<ClientId, AccessError> {
        let id = ClientId::generate();
        let fut = async {
            sqlx::query("INSERT INTO clients (id, name) VALUES ($1, $2)")
                .bind(id.as_uuid())
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("register_client", e))
        };
        bounded("register_client", self.query_timeout, fut).await?;
        tracing::info!(client_id = %id, name, "Registered client");
        Ok(id)
    }

    pub async fn find_client(&self, name: &str) -> Result<Option<ClientId>, AccessError> {
        let fut = async {
            sqlx::query("SELECT id FROM clients WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("find_client", e))
        };
        let row = bounded("find_client", self.query_timeout, fut).await?;
        row.map(|r| {
            r.try_get::<Uuid, _>("id")
                .map(ClientId::from)
                .map_err(|e| db_error("find_client", e))
        })
        .transpose()
    }

    /// Registers a platform user. `client_id` is `None` for internal staff.
    pub async fn register_user(
        &self,
        email: &str,
        client_id: Option<ClientId>,
    ) -> Result<UserId, AccessError> {
        let id = UserId::generate();
        let fut = async {
            sqlx::query("INSERT INTO users (id, email, client_id) VALUES ($1, $2, $3)")
                .bind(id.as_uuid())
                .bind(email)
                .bind(client_id.map(|c| c.as_uuid()))
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("register_user", e))
        };
        bounded("register_user", self.query_timeout, fut).await?;
        Ok(id)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<TenantUser>, AccessError> {
        let fut = async {
            let row = sqlx::query("SELECT id, email, client_id FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("get_user", e))?;

            let Some(row) = row else {
                return Ok(None);
            };
            let client_id: Option<Uuid> =
                row.try_get("client_id").map_err(|e| db_error("get_user", e))?;
            Ok(Some(TenantUser {
                id: UserId::from(row.try_get::<Uuid, _>("id").map_err(|e| db_error("get_user", e))?),
                email: row.try_get("email").map_err(|e| db_error("get_user", e))?,
                client_id: client_id.map(ClientId::from),
            }))
        };
        bounded("get_user", self.query_timeout, fut).await
    }
}

#[async_trait]
impl ClientDirectory for TenantDirectory {
    async fn client_for_user(&self, user_id: UserId) -> Result<Option<ClientId>, AccessError> {
        Ok(self.get_user(user_id).await?.and_then(|u| u.client_id))
    }
}
