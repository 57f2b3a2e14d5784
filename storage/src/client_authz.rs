//! Client-tier roles and permissions, stored in each client's own database.
//!
//! Clients may define roles beyond the seeded [`ClientRole`] set; those
//! grant permissions like any other role but never widen question
//! visibility, which only the built-in roles decide.

use std::time::Duration;

use async_trait::async_trait;
use attest_core::{AppModule, ClientRole, UserId};
use errors::AccessError;
use sqlx::{PgConnection, PgPool, Row};
use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::authz::PermissionResolver;
use crate::postgres::{bounded, db_error};

#[derive(Clone)]
pub struct ClientAuthorizer {
    pool: PgPool,
    query_timeout: Duration,
}

fn privilege_rank(role: ClientRole) -> u8 {
    match role {
        ClientRole::Administrator => 0,
        ClientRole::PointOfContact => 1,
        ClientRole::Stakeholder => 2,
        ClientRole::Viewer => 3,
    }
}

impl ClientAuthorizer {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Every role name the user holds in this client database.
    pub async fn role_names(&self, user_id: UserId) -> Result<Vec<String>, AccessError> {
        let fut = async {
            let rows = sqlx::query(
                "SELECT r.name FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = $1
                 ORDER BY r.name",
            )
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("client_roles", e))?;
            rows.iter()
                .map(|r| r.try_get::<String, _>("name").map_err(|e| db_error("client_roles", e)))
                .collect()
        };
        bounded("client_roles", self.query_timeout, fut).await
    }

    /// The built-in roles the user holds, most privileged first.
    pub async fn client_roles(&self, user_id: UserId) -> Result<Vec<ClientRole>, AccessError> {
        let mut roles: Vec<ClientRole> = self
            .role_names(user_id)
            .await?
            .iter()
            .filter_map(|name| ClientRole::from_name(name))
            .collect();
        roles.sort_by_key(|r| privilege_rank(*r));
        roles.dedup();
        Ok(roles)
    }

    /// Union of the modules the user's built-in roles expose, in menu order.
    /// Client-defined roles contribute nothing.
    pub async fn visible_modules(&self, user_id: UserId) -> Result<Vec<AppModule>, AccessError> {
        let roles = self.client_roles(user_id).await?;
        Ok(AppModule::iter()
            .filter(|module| roles.iter().any(|role| role.can_view(*module)))
            .collect())
    }

    /// Whether the user sees every question without an assignment.
    pub async fn sees_all_questions(&self, user_id: UserId) -> Result<bool, AccessError> {
        Ok(self
            .client_roles(user_id)
            .await?
            .iter()
            .any(ClientRole::sees_all_questions))
    }

    /// Creates a client-defined role.
    pub async fn create_role(&self, name: &str, description: Option<&str>) -> Result<Uuid, AccessError> {
        let fut = async {
            let mut conn = self.pool.acquire().await.map_err(|e| db_error("create_client_role", e))?;
            ensure_role(&mut conn, name, description).await
        };
        bounded("create_client_role", self.query_timeout, fut).await
    }

    /// Inserts the built-in roles and their default grants in one
    /// transaction. Safe to re-run; existing grants are kept.
    pub async fn seed_default_roles(&self) -> Result<(), AccessError> {
        let fut = async {
            let mut tx = self.pool.begin().await.map_err(|e| db_error("seed_client_roles", e))?;
            for role in ClientRole::iter() {
                let role_id = ensure_role(&mut tx, role.as_ref(), Some(role.description())).await?;
                for permission in role.default_permissions() {
                    let permission_id = ensure_permission(&mut tx, permission).await?;
                    link_permission(&mut tx, role_id, permission_id, "seed_client_roles").await?;
                }
            }
            tx.commit().await.map_err(|e| db_error("seed_client_roles", e))
        };
        bounded("seed_client_roles", self.query_timeout, fut).await?;
        tracing::info!("Seeded default client roles");
        Ok(())
    }

    pub async fn grant_permission(&self, role: &str, permission: &str) -> Result<(), AccessError> {
        let fut = async {
            let mut tx = self.pool.begin().await.map_err(|e| db_error("grant_client_permission", e))?;
            let role_id = ensure_role(&mut tx, role, None).await?;
            let permission_id = ensure_permission(&mut tx, permission).await?;
            link_permission(&mut tx, role_id, permission_id, "grant_client_permission").await?;
            tx.commit().await.map_err(|e| db_error("grant_client_permission", e))
        };
        bounded("grant_client_permission", self.query_timeout, fut).await?;
        tracing::info!(role, permission, "Granted client permission");
        Ok(())
    }

    pub async fn revoke_permission(&self, role: &str, permission: &str) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query(
                "DELETE FROM role_permissions rp
                 USING roles r, permissions p
                 WHERE rp.role_id = r.id AND rp.permission_id = p.id
                   AND r.name = $1 AND p.name = $2",
            )
            .bind(role)
            .bind(permission)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("revoke_client_permission", e))
        };
        let result = bounded("revoke_client_permission", self.query_timeout, fut).await?;
        tracing::info!(role, permission, "Revoked client permission");
        Ok(result.rows_affected() > 0)
    }

    pub async fn assign_role(&self, user_id: UserId, role: &str) -> Result<(), AccessError> {
        let fut = async {
            let mut tx = self.pool.begin().await.map_err(|e| db_error("assign_client_role", e))?;
            let role_id = ensure_role(&mut tx, role, None).await?;
            sqlx::query(
                "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id.as_uuid())
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("assign_client_role", e))?;
            tx.commit().await.map_err(|e| db_error("assign_client_role", e))
        };
        bounded("assign_client_role", self.query_timeout, fut).await?;
        tracing::info!(user_id = %user_id, role, "Assigned client role");
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: UserId, role: &str) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query(
                "DELETE FROM user_roles ur
                 USING roles r
                 WHERE ur.role_id = r.id AND ur.user_id = $1 AND r.name = $2",
            )
            .bind(user_id.as_uuid())
            .bind(role)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("revoke_client_role", e))
        };
        let result = bounded("revoke_client_role", self.query_timeout, fut).await?;
        tracing::info!(user_id = %user_id, role, "Revoked client role");
        Ok(result.rows_affected() > 0)
    }
}

async fn ensure_role(
    conn: &mut PgConnection,
    name: &str,
    description: Option<&str>,
) -> Result<Uuid, AccessError> {
    let row = sqlx::query(
        "INSERT INTO roles (id, name, description) VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE SET description = COALESCE(EXCLUDED.description, roles.description)
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(description)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("create_client_role", e))?;
    row.try_get("id").map_err(|e| db_error("create_client_role", e))
}

async fn ensure_permission(conn: &mut PgConnection, name: &str) -> Result<Uuid, AccessError> {
    let row = sqlx::query(
        "INSERT INTO permissions (id, name) VALUES ($1, $2)
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("create_client_permission", e))?;
    row.try_get("id").map_err(|e| db_error("create_client_permission", e))
}

async fn link_permission(
    conn: &mut PgConnection,
    role_id: Uuid,
    permission_id: Uuid,
    operation: &str,
) -> Result<(), AccessError> {
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(role_id)
    .bind(permission_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error(operation, e))?;
    Ok(())
}

#[async_trait]
impl PermissionResolver for ClientAuthorizer {
    async fn has_permission(&self, user_id: UserId, permission: &str) -> Result<bool, AccessError> {
        let fut = async {
            let row = sqlx::query(
                "SELECT EXISTS (
                     SELECT 1 FROM user_roles ur
                     JOIN role_permissions rp ON rp.role_id = ur.role_id
                     JOIN permissions p ON p.id = rp.permission_id
                     WHERE ur.user_id = $1 AND p.name = $2
                 ) AS granted",
            )
            .bind(user_id.as_uuid())
            .bind(permission)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("client_has_permission", e))?;
            row.try_get::<bool, _>("granted")
                .map_err(|e| db_error("client_has_permission", e))
        };
        bounded("client_has_permission", self.query_timeout, fut).await
    }

    /// Most privileged built-in role if the user has one, otherwise the first
    /// client-defined role by name.
    async fn role(&self, user_id: UserId) -> Result<Option<String>, AccessError> {
        let names = self.role_names(user_id).await?;
        let best_builtin = names
            .iter()
            .filter_map(|n| ClientRole::from_name(n))
            .min_by_key(|r| privilege_rank(*r));
        Ok(match best_builtin {
            Some(role) => Some(role.to_string()),
            None => names.into_iter().next(),
        })
    }
}
