use std::future::Future;
use std::time::Duration;

use config::TenantDatabaseConfig;
use errors::AccessError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Access to the central tenant database.
pub trait TenantStore: Send + Sync {
    fn pool(&self) -> &PgPool;
}

impl TenantStore for PgPool {
    fn pool(&self) -> &PgPool {
        self
    }
}

pub struct TenantDatabase {
    pool: PgPool,
}

impl TenantDatabase {
    pub async fn connect(config: &TenantDatabaseConfig) -> Result<Self, AccessError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(&config.password)
            .application_name("attest-tenant");

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.timeout())
            .connect_with(options)
            .await
            .map_err(|e| AccessError::database("connect_tenant_database", e))?;

        tracing::info!(
            host = %config.host,
            database = %config.database,
            "Connected to tenant database"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), AccessError> {
        initialize_tenant_schema(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl TenantStore for TenantDatabase {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_error(operation: &str, err: sqlx::Error) -> AccessError {
    AccessError::database(operation, err)
}

/// Runs `fut` with an upper bound of `limit`, mapping expiry to
/// [`AccessError::Timeout`]. The inner future is dropped on expiry, which
/// rolls back any open transaction it owns.
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, AccessError>
where
    F: Future<Output = Result<T, AccessError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Operation timed out");
            Err(AccessError::Timeout {
                operation: operation.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

const TENANT_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clients (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        client_id UUID REFERENCES clients(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_client_id ON users(client_id)",
    "CREATE TABLE IF NOT EXISTS client_database_credentials (
        client_id UUID PRIMARY KEY REFERENCES clients(id) ON DELETE CASCADE,
        host TEXT NOT NULL,
        port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
        db_name TEXT NOT NULL,
        db_user TEXT NOT NULL,
        encrypted_password TEXT NOT NULL,
        schema_version INTEGER NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS tenant_roles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS tenant_permissions (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS tenant_role_permissions (
        role_id UUID NOT NULL REFERENCES tenant_roles(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES tenant_permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )",
    "CREATE TABLE IF NOT EXISTS tenant_user_roles (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id UUID NOT NULL REFERENCES tenant_roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_tenant_role_permissions_permission
        ON tenant_role_permissions(permission_id)",
];

// User ids in the client tier are platform identities from the tenant
// database, so they carry no foreign key here.
const CLIENT_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS roles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS permissions (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS role_permissions (
        role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )",
    "CREATE TABLE IF NOT EXISTS user_roles (
        user_id UUID NOT NULL,
        role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )",
    "CREATE TABLE IF NOT EXISTS audits (
        id UUID PRIMARY KEY,
        framework TEXT NOT NULL,
        assignee UUID,
        due_date DATE,
        status TEXT NOT NULL DEFAULT 'not_started',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS questions (
        id UUID PRIMARY KEY,
        audit_id UUID NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
        prompt TEXT NOT NULL,
        question_type TEXT NOT NULL,
        mandatory BOOLEAN NOT NULL DEFAULT false,
        position INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_questions_audit ON questions(audit_id, position)",
    "CREATE TABLE IF NOT EXISTS question_assignments (
        question_id UUID NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        user_id UUID NOT NULL,
        assigned_by UUID,
        assigned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (question_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_question_assignments_user ON question_assignments(user_id)",
    "CREATE TABLE IF NOT EXISTS submissions (
        id UUID PRIMARY KEY,
        question_id UUID NOT NULL UNIQUE REFERENCES questions(id) ON DELETE CASCADE,
        answer JSONB NOT NULL,
        submitted_by UUID NOT NULL,
        status TEXT NOT NULL CHECK (status IN
            ('not_started', 'in_progress', 'submitted', 'approved', 'rejected', 'referred')),
        reviewer UUID,
        review_notes TEXT,
        version INTEGER NOT NULL CHECK (version >= 1),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
];

async fn apply_statements(
    pool: &PgPool,
    operation: &str,
    statements: &[&'static str],
) -> Result<(), AccessError> {
    let mut tx = pool.begin().await.map_err(|e| db_error(operation, e))?;
    for statement in statements {
        sqlx::query(*statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(operation, e))?;
    }
    tx.commit().await.map_err(|e| db_error(operation, e))?;
    Ok(())
}

/// Creates the tenant tables if they do not exist yet.
pub async fn initialize_tenant_schema(pool: &PgPool) -> Result<(), AccessError> {
    apply_statements(pool, "initialize_tenant_schema", TENANT_SCHEMA).await?;
    tracing::info!("Tenant schema ready");
    Ok(())
}

/// Creates the per-client tables if they do not exist yet.
pub async fn initialize_client_schema(pool: &PgPool) -> Result<(), AccessError> {
    apply_statements(pool, "initialize_client_schema", CLIENT_SCHEMA).await?;
    tracing::info!("Client schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let ok = bounded("noop", Duration::from_secs(1), async { Ok::<_, AccessError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded("noop", Duration::from_secs(1), async {
            Err::<(), _>(AccessError::PermissionDenied)
        })
        .await;
        assert!(matches!(err, Err(AccessError::PermissionDenied)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result = bounded("slow_query", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, AccessError>(())
        })
        .await;

        match result {
            Err(AccessError::Timeout {
                operation,
                timeout_ms,
            }) => {
                assert_eq!(operation, "slow_query");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_statements_are_idempotent() {
        for statement in TENANT_SCHEMA.iter().chain(CLIENT_SCHEMA) {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "statement is not re-runnable: {statement}"
            );
        }
    }
}
