//! Platform-wide (tenant tier) roles and permissions.

use std::time::Duration;

use async_trait::async_trait;
use attest_core::UserId;
use errors::AccessError;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::authz::PermissionResolver;
use crate::postgres::{bounded, db_error};

#[derive(Clone)]
pub struct TenantAuthorizer {
    pool: PgPool,
    query_timeout: Duration,
}

impl TenantAuthorizer {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Every tenant role the user holds, alphabetically.
    pub async fn roles(&self, user_id: UserId) -> Result<Vec<String>, AccessError> {
        let fut = async {
            let rows = sqlx::query(
                "SELECT r.name FROM tenant_user_roles ur
                 JOIN tenant_roles r ON r.id = ur.role_id
                 WHERE ur.user_id = $1
                 ORDER BY r.name",
            )
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("tenant_roles", e))?;
            rows.iter()
                .map(|r| r.try_get::<String, _>("name").map_err(|e| db_error("tenant_roles", e)))
                .collect()
        };
        bounded("tenant_roles", self.query_timeout, fut).await
    }

    pub async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Uuid, AccessError> {
        let fut = async {
            let mut conn = self.pool.acquire().await.map_err(|e| db_error("create_tenant_role", e))?;
            ensure_role(&mut conn, name, description).await
        };
        bounded("create_tenant_role", self.query_timeout, fut).await
    }

    pub async fn create_permission(&self, name: &str) -> Result<Uuid, AccessError> {
        let fut = async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| db_error("create_tenant_permission", e))?;
            ensure_permission(&mut conn, name).await
        };
        bounded("create_tenant_permission", self.query_timeout, fut).await
    }

    /// Grants `permission` to `role`, creating either if missing.
    pub async fn grant_permission(&self, role: &str, permission: &str) -> Result<(), AccessError> {
        let fut = async {
            let mut tx = self.pool.begin().await.map_err(|e| db_error("grant_tenant_permission", e))?;
            let role_id = ensure_role(&mut tx, role, None).await?;
            let permission_id = ensure_permission(&mut tx, permission).await?;
            sqlx::query(
                "INSERT INTO tenant_role_permissions (role_id, permission_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("grant_tenant_permission", e))?;
            tx.commit().await.map_err(|e| db_error("grant_tenant_permission", e))
        };
        bounded("grant_tenant_permission", self.query_timeout, fut).await?;
        tracing::info!(role, permission, "Granted tenant permission");
        Ok(())
    }

    pub async fn revoke_permission(&self, role: &str, permission: &str) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query(
                "DELETE FROM tenant_role_permissions rp
                 USING tenant_roles r, tenant_permissions p
                 WHERE rp.role_id = r.id AND rp.permission_id = p.id
                   AND r.name = $1 AND p.name = $2",
            )
            .bind(role)
            .bind(permission)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("revoke_tenant_permission", e))
        };
        let result = bounded("revoke_tenant_permission", self.query_timeout, fut).await?;
        tracing::info!(role, permission, "Revoked tenant permission");
        Ok(result.rows_affected() > 0)
    }

    pub async fn assign_role(&self, user_id: UserId, role: &str) -> Result<(), AccessError> {
        let fut = async {
            let mut tx = self.pool.begin().await.map_err(|e| db_error("assign_tenant_role", e))?;
            let role_id = ensure_role(&mut tx, role, None).await?;
            sqlx::query(
                "INSERT INTO tenant_user_roles (user_id, role_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id.as_uuid())
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("assign_tenant_role", e))?;
            tx.commit().await.map_err(|e| db_error("assign_tenant_role", e))
        };
        bounded("assign_tenant_role", self.query_timeout, fut).await?;
        tracing::info!(user_id = %user_id, role, "Assigned tenant role");
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: UserId, role: &str) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query(
                "DELETE FROM tenant_user_roles ur
                 USING tenant_roles r
                 WHERE ur.role_id = r.id AND ur.user_id = $1 AND r.name = $2",
            )
            .bind(user_id.as_uuid())
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("revoke_tenant_role", e))
        };
        let result = bounded("revoke_tenant_role", self.query_timeout, fut).await?;
        tracing::info!(user_id = %user_id, role, "Revoked tenant role");
        Ok(result.rows_affected() > 0)
    }
}

async fn ensure_role(
    conn: &mut PgConnection,
    name: &str,
    description: Option<&str>,
) -> Result<Uuid, AccessError> {
    let row = sqlx::query(
        "INSERT INTO tenant_roles (id, name, description) VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE SET description = COALESCE(EXCLUDED.description, tenant_roles.description)
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(description)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("create_tenant_role", e))?;
    row.try_get("id").map_err(|e| db_error("create_tenant_role", e))
}

async fn ensure_permission(conn: &mut PgConnection, name: &str) -> Result<Uuid, AccessError> {
    let row = sqlx::query(
        "INSERT INTO tenant_permissions (id, name) VALUES ($1, $2)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("create_tenant_permission", e))?;
    row.try_get("id").map_err(|e| db_error("create_tenant_permission", e))
}

#[async_trait]
impl PermissionResolver for TenantAuthorizer {
    async fn has_permission(&self, user_id: UserId, permission: &str) -> Result<bool, AccessError> {
        let fut = async {
            let row = sqlx::query(
                "SELECT EXISTS (
                     SELECT 1 FROM tenant_user_roles ur
                     JOIN tenant_role_permissions rp ON rp.role_id = ur.role_id
                     JOIN tenant_permissions p ON p.id = rp.permission_id
                     WHERE ur.user_id = $1 AND p.name = $2
                 ) AS granted",
            )
            .bind(user_id.as_uuid())
            .bind(permission)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("tenant_has_permission", e))?;
            row.try_get::<bool, _>("granted")
                .map_err(|e| db_error("tenant_has_permission", e))
        };
        bounded("tenant_has_permission", self.query_timeout, fut).await
    }

    async fn role(&self, user_id: UserId) -> Result<Option<String>, AccessError> {
        Ok(self.roles(user_id).await?.into_iter().next())
    }
}
