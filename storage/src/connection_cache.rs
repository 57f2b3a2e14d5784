//! Per-client connection pool cache.
//!
//! Maps a [`ClientId`] to a live pool against that client's database. Pools
//! are built lazily on first use and shared by every later request.
//!
//! Concurrency rules:
//! - Lookups of an already built pool take only the read lock.
//! - Each client has one [`OnceCell`] slot per construction attempt;
//!   concurrent first requests for the same client wait on that attempt and
//!   all receive its outcome, success or failure.
//! - A failed attempt is dropped from the map once settled, so the next
//!   request retries instead of inheriting a cached failure.
//! - No lock is held across network I/O.
//! - Construction runs in its own task. A caller that gives up (cancellation)
//!   stops waiting, but the construction still completes and populates the
//!   slot for later callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use attest_core::ClientId;
use config::ClientPoolConfig;
use errors::AccessError;
use parking_lot::RwLock;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::credential_vault::{CredentialSource, ResolvedCredential};

const POOL_GAUGE: &str = "attest_client_pools";
const FAILURE_COUNTER: &str = "attest_client_pool_failures_total";

/// Builds, probes and tears down pools for client databases.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    type Pool: Clone + Send + Sync + 'static;

    async fn connect(&self, credential: &ResolvedCredential) -> Result<Self::Pool, AccessError>;

    /// One trivial round trip proving the pool can reach its database.
    async fn probe(&self, pool: &Self::Pool) -> Result<(), AccessError>;

    async fn close(&self, pool: &Self::Pool);

    fn is_closed(&self, pool: &Self::Pool) -> bool;
}

/// sqlx-backed connector applying the configured pool bounds.
pub struct PgPoolConnector {
    config: ClientPoolConfig,
}

impl PgPoolConnector {
    pub fn new(config: ClientPoolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PoolConnector for PgPoolConnector {
    type Pool = PgPool;

    async fn connect(&self, credential: &ResolvedCredential) -> Result<PgPool, AccessError> {
        let options = PgConnectOptions::new()
            .host(&credential.host)
            .port(credential.port)
            .database(&credential.database)
            .username(&credential.username)
            .password(&credential.password)
            .application_name("attest-client");

        let pool = PgPoolOptions::new()
            .min_connections(self.config.min_connections)
            .max_connections(self.config.max_connections)
            .acquire_timeout(self.config.acquire_timeout())
            .idle_timeout(Some(self.config.idle_timeout()))
            .connect_lazy_with(options);
        Ok(pool)
    }

    async fn probe(&self, pool: &PgPool) -> Result<(), AccessError> {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map(|_| ())
            .map_err(|e| AccessError::database("probe_client_pool", e))
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
    }

    fn is_closed(&self, pool: &PgPool) -> bool {
        pool.is_closed()
    }
}

/// One construction attempt. The outcome is written once and handed to
/// every caller that joined the attempt.
struct PoolSlot<P> {
    cell: OnceCell<Result<P, AccessError>>,
    evicted: AtomicBool,
}

impl<P> PoolSlot<P> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            evicted: AtomicBool::new(false),
        }
    }

    fn pool(&self) -> Option<&P> {
        self.cell.get().and_then(|r| r.as_ref().ok())
    }

    fn failed(&self) -> bool {
        self.cell.get().is_some_and(Result::is_err)
    }
}

type SlotMap<P> = HashMap<ClientId, Arc<PoolSlot<P>>>;

pub struct ClientPoolCache<C: PoolConnector> {
    connector: Arc<C>,
    credentials: Arc<dyn CredentialSource>,
    probe_timeout: Duration,
    slots: Arc<RwLock<SlotMap<C::Pool>>>,
}

pub type PgClientPoolCache = ClientPoolCache<PgPoolConnector>;

impl PgClientPoolCache {
    pub fn from_config(config: &ClientPoolConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self::new(
            PgPoolConnector::new(config.clone()),
            credentials,
            config.probe_timeout(),
        )
    }
}

fn unavailable(client_id: ClientId, reason: impl Into<String>) -> AccessError {
    AccessError::ConnectionUnavailable {
        client_id: client_id.to_string(),
        reason: reason.into(),
    }
}

fn failure_reason(err: &AccessError) -> &'static str {
    match err {
        AccessError::NotFound { .. } => "credential_missing",
        AccessError::CorruptCiphertext { .. } => "credential_corrupt",
        AccessError::Timeout { .. } => "probe_timeout",
        AccessError::Cancelled { .. } => "cancelled",
        _ => "connect_failed",
    }
}

fn record_failure(err: &AccessError) {
    metrics::counter!(FAILURE_COUNTER, "reason" => failure_reason(err)).increment(1);
}

fn publish_pool_count<P>(slots: &SlotMap<P>) {
    let live = slots.values().filter(|s| s.pool().is_some()).count();
    metrics::gauge!(POOL_GAUGE).set(live as f64);
}

async fn build_pool<C: PoolConnector>(
    connector: &C,
    credentials: &dyn CredentialSource,
    client_id: ClientId,
    probe_timeout: Duration,
) -> Result<C::Pool, AccessError> {
    // A slow or failing tenant store is an unavailable client, not a request
    // timeout; the caller's own budget is enforced above this layer.
    let credential = credentials.resolve(client_id).await.map_err(|e| match e {
        AccessError::Timeout { .. } | AccessError::Database { .. } => {
            unavailable(client_id, format!("credential lookup failed: {e}"))
        }
        other => other,
    })?;
    let pool = connector.connect(&credential).await.map_err(|e| match e {
        AccessError::ConnectionUnavailable { .. } => e,
        other => unavailable(client_id, other.to_string()),
    })?;
    drop(credential);

    match tokio::time::timeout(probe_timeout, connector.probe(&pool)).await {
        Ok(Ok(())) => Ok(pool),
        Ok(Err(e)) => {
            connector.close(&pool).await;
            Err(unavailable(client_id, format!("liveness probe failed: {e}")))
        }
        Err(_) => {
            connector.close(&pool).await;
            Err(unavailable(
                client_id,
                format!(
                    "liveness probe exceeded {}ms",
                    probe_timeout.as_millis()
                ),
            ))
        }
    }
}

impl<C: PoolConnector> ClientPoolCache<C> {
    pub fn new(connector: C, credentials: Arc<dyn CredentialSource>, probe_timeout: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            credentials,
            probe_timeout,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the live pool for `client_id`, building it if needed.
    pub async fn get_pool(&self, client_id: ClientId) -> Result<C::Pool, AccessError> {
        if let Some(pool) = self.cached(client_id) {
            return Ok(pool);
        }
        let task = self.spawn_construction(client_id);
        match task.await {
            Ok(result) => result,
            Err(e) => Err(unavailable(client_id, format!("pool construction aborted: {e}"))),
        }
    }

    /// Like [`get_pool`](Self::get_pool), but returns
    /// [`AccessError::Cancelled`] as soon as `cancel` fires. An in-flight
    /// construction keeps running and is cached for the next caller.
    pub async fn get_pool_with_cancel(
        &self,
        client_id: ClientId,
        cancel: &CancellationToken,
    ) -> Result<C::Pool, AccessError> {
        if cancel.is_cancelled() {
            return Err(AccessError::Cancelled {
                operation: "get_client_pool".to_string(),
            });
        }
        if let Some(pool) = self.cached(client_id) {
            return Ok(pool);
        }

        let task = self.spawn_construction(client_id);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let err = AccessError::Cancelled {
                    operation: "get_client_pool".to_string(),
                };
                record_failure(&err);
                tracing::debug!(client_id = %client_id, "Caller cancelled while waiting for client pool");
                Err(err)
            }
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(unavailable(client_id, format!("pool construction aborted: {e}"))),
            }
        }
    }

    /// Closes and forgets the pool for `client_id`. Returns whether a live
    /// pool was torn down. The next request builds a fresh pool, picking up
    /// rotated credentials.
    pub async fn remove_pool(&self, client_id: ClientId) -> bool {
        let removed = {
            let mut slots = self.slots.write();
            let removed = slots.remove(&client_id);
            publish_pool_count(&slots);
            removed
        };

        let Some(slot) = removed else {
            return false;
        };
        slot.evicted.store(true, Ordering::SeqCst);
        match slot.pool() {
            Some(pool) => {
                self.connector.close(pool).await;
                tracing::info!(client_id = %client_id, "Closed client connection pool");
                true
            }
            None => false,
        }
    }

    /// Closes every pool. Later requests rebuild on demand.
    pub async fn close(&self) {
        let drained: Vec<(ClientId, Arc<PoolSlot<C::Pool>>)> = {
            let mut slots = self.slots.write();
            let drained = slots.drain().collect();
            publish_pool_count(&slots);
            drained
        };

        for (client_id, slot) in drained {
            slot.evicted.store(true, Ordering::SeqCst);
            if let Some(pool) = slot.pool() {
                self.connector.close(pool).await;
                tracing::debug!(client_id = %client_id, "Closed client connection pool");
            }
        }
        tracing::info!("Client connection cache closed");
    }

    /// Number of clients with a built pool.
    pub fn pool_count(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|s| s.pool().is_some())
            .count()
    }

    fn cached(&self, client_id: ClientId) -> Option<C::Pool> {
        let stale = {
            let slots = self.slots.read();
            let slot = slots.get(&client_id)?;
            let pool = slot.pool()?;
            if !self.connector.is_closed(pool) {
                return Some(pool.clone());
            }
            Arc::clone(slot)
        };

        // Closed underneath us; drop the slot so the next caller rebuilds.
        let mut slots = self.slots.write();
        if slots
            .get(&client_id)
            .is_some_and(|current| Arc::ptr_eq(current, &stale))
        {
            slots.remove(&client_id);
            publish_pool_count(&slots);
            tracing::warn!(client_id = %client_id, "Discarded closed client connection pool");
        }
        None
    }

    /// Joins the in-flight attempt for `client_id`, or starts a new one when
    /// there is none or the last one already failed.
    fn slot_for(&self, client_id: ClientId) -> Arc<PoolSlot<C::Pool>> {
        if let Some(slot) = self.slots.read().get(&client_id)
            && !slot.failed()
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        match slots.get(&client_id) {
            Some(slot) if !slot.failed() => Arc::clone(slot),
            _ => {
                let slot = Arc::new(PoolSlot::new());
                slots.insert(client_id, Arc::clone(&slot));
                slot
            }
        }
    }

    fn spawn_construction(
        &self,
        client_id: ClientId,
    ) -> tokio::task::JoinHandle<Result<C::Pool, AccessError>> {
        let slot = self.slot_for(client_id);
        let connector = Arc::clone(&self.connector);
        let credentials = Arc::clone(&self.credentials);
        let slots = Arc::clone(&self.slots);
        let probe_timeout = self.probe_timeout;

        tokio::spawn(async move {
            let initialized_here = AtomicBool::new(false);
            let built = slot
                .cell
                .get_or_init(|| async {
                    initialized_here.store(true, Ordering::SeqCst);
                    tracing::info!(client_id = %client_id, "Building client connection pool");
                    build_pool(connector.as_ref(), credentials.as_ref(), client_id, probe_timeout)
                        .await
                })
                .await
                .clone();

            match built {
                Ok(pool) => settle_success(&slots, &slot, connector.as_ref(), client_id, pool).await,
                // Joined someone else's failed attempt; the initializer logs it.
                Err(e) if !initialized_here.load(Ordering::SeqCst) => Err(e),
                Err(e) => {
                    settle_failure(&slots, &slot, client_id);
                    record_failure(&e);
                    if e.is_security_event() {
                        tracing::error!(
                            security_event = "client_pool_credential_rejected",
                            client_id = %client_id,
                            error = %e,
                            "Client pool construction refused"
                        );
                    } else {
                        tracing::warn!(
                            client_id = %client_id,
                            operation = "get_client_pool",
                            error = %e,
                            "Client pool construction failed"
                        );
                    }
                    Err(e)
                }
            }
        })
    }
}

/// Reconciles a freshly initialized slot with the map so that at most one
/// live pool per client survives.
async fn settle_success<C: PoolConnector>(
    slots: &RwLock<SlotMap<C::Pool>>,
    slot: &Arc<PoolSlot<C::Pool>>,
    connector: &C,
    client_id: ClientId,
    pool: C::Pool,
) -> Result<C::Pool, AccessError> {
    if slot.evicted.load(Ordering::SeqCst) {
        connector.close(&pool).await;
        return Err(unavailable(client_id, "pool evicted during construction"));
    }

    let winner = {
        let mut map = slots.write();
        let winner = match map.get(&client_id) {
            Some(current) if Arc::ptr_eq(current, slot) => None,
            Some(current) => match current.pool() {
                Some(existing) => Some(existing.clone()),
                None => {
                    map.insert(client_id, Arc::clone(slot));
                    None
                }
            },
            None => {
                map.insert(client_id, Arc::clone(slot));
                None
            }
        };
        publish_pool_count(&map);
        winner
    };

    match winner {
        Some(existing) => {
            connector.close(&pool).await;
            Ok(existing)
        }
        None => {
            tracing::info!(client_id = %client_id, "Client connection pool ready");
            Ok(pool)
        }
    }
}

fn settle_failure<P>(slots: &RwLock<SlotMap<P>>, slot: &Arc<PoolSlot<P>>, client_id: ClientId) {
    let mut map = slots.write();
    let is_current = map
        .get(&client_id)
        .is_some_and(|current| Arc::ptr_eq(current, slot));
    if is_current {
        map.remove(&client_id);
    }
}
