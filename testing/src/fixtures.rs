use std::sync::atomic::{AtomicU32, Ordering};

use sqlx::{AssertSqlSafe, PgPool};
use sqlx::postgres::PgPoolOptions;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

const SUPERUSER: &str = "testuser";
const SUPERUSER_PASSWORD: &str = "testpass";
const ADMIN_DATABASE: &str = "testdb";

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Process-unique name built from `prefix`. Only lowercase ASCII, digits and
/// underscores, so it is safe as a bare Postgres identifier.
pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let sanitized: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_{}_{}", sanitized, std::process::id(), id)
}

pub struct PostgresFixture {
    #[allow(dead_code)]
    container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
}

impl PostgresFixture {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        SUPERUSER
    }

    pub fn password(&self) -> &str {
        SUPERUSER_PASSWORD
    }

    pub fn url(&self) -> String {
        self.url_for(ADMIN_DATABASE)
    }

    pub fn url_for(&self, database: &str) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            SUPERUSER, SUPERUSER_PASSWORD, self.host, self.port, database
        )
    }

    /// Creates an empty database named after `prefix` and returns its name
    /// together with a small pool connected to it.
    pub async fn create_database(&self, prefix: &str) -> anyhow::Result<(String, PgPool)> {
        let name = unique_id(prefix);
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.url())
            .await?;
        // Identifiers cannot be bound as parameters; `unique_id` only yields
        // [a-z0-9_].
        let statement = format!("CREATE DATABASE {name}");
        sqlx::query(AssertSqlSafe(statement.as_str()))
            .execute(&admin)
            .await?;
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&self.url_for(&name))
            .await?;
        tracing::debug!(database = %name, "Created test database");
        Ok((name, pool))
    }
}

static POSTGRES: OnceCell<Option<PostgresFixture>> = OnceCell::const_new();

pub async fn postgres() -> Option<&'static PostgresFixture> {
    POSTGRES
        .get_or_init(|| async {
            let container_result = Postgres::default()
                .with_db_name(ADMIN_DATABASE)
                .with_user(SUPERUSER)
                .with_password(SUPERUSER_PASSWORD)
                .with_tag("16-alpine")
                .start()
                .await;

            match container_result {
                Ok(container) => {
                    let port = container.get_host_port_ipv4(5432).await.ok()?;
                    let host = container
                        .get_host()
                        .await
                        .map(|h| h.to_string())
                        .unwrap_or_else(|_| "localhost".to_string());
                    tracing::info!("PostgreSQL fixture started on port {}", port);
                    Some(PostgresFixture {
                        container,
                        host,
                        port,
                    })
                }
                Err(e) => {
                    tracing::warn!("Failed to start PostgreSQL container: {:?}", e);
                    None
                }
            }
        })
        .await
        .as_ref()
}
