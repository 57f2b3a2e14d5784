use std::sync::Arc;
use std::time::Duration;

use attest_core::{
    AppModule, AuditId, ClientId, Question, QuestionAssignment, QuestionId, ReviewAction,
    Submission, TokenValidator, UserId, permissions,
};
use config::{ClientPoolConfig, Config};
use errors::AccessError;
use serde_json::Value;
use sqlx::PgPool;
use storage::{
    ClientAuthorizer, CredentialCipher, CredentialVault, PermissionResolver, PgClientPoolCache,
    PgPoolConnector, SubmissionEngine, TenantAuthorizer, TenantDatabase, TenantDirectory,
    TenantStore,
};
use tracing::info;

use crate::request::{RequestContext, RequestOptions};
use crate::resolver::ContextResolver;

/// Wires the tenant database, credential vault, client pool cache and both
/// authorization tiers behind one handle.
pub struct AccessCore {
    tenant: TenantDatabase,
    directory: Arc<TenantDirectory>,
    tenant_authz: TenantAuthorizer,
    vault: Arc<CredentialVault>,
    cache: Arc<PgClientPoolCache>,
    resolver: ContextResolver<PgPoolConnector>,
    query_timeout: Duration,
}

impl AccessCore {
    pub async fn connect(config: &Config, validator: Arc<dyn TokenValidator>) -> Result<Self, AccessError> {
        let tenant = TenantDatabase::connect(&config.tenant_database).await?;
        let cipher = CredentialCipher::from_config(&config.encryption)?;
        Ok(Self::from_parts(tenant, cipher, &config.pool, validator))
    }

    pub fn from_parts(
        tenant: TenantDatabase,
        cipher: CredentialCipher,
        pool_config: &ClientPoolConfig,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        let query_timeout = pool_config.query_timeout();
        let tenant_pool = tenant.pool().clone();
        let directory = Arc::new(TenantDirectory::new(tenant_pool.clone(), query_timeout));
        let vault = Arc::new(CredentialVault::new(
            tenant_pool.clone(),
            Arc::new(cipher),
            query_timeout,
        ));
        let cache = Arc::new(PgClientPoolCache::from_config(pool_config, vault.clone()));
        let resolver = ContextResolver::new(validator, directory.clone(), cache.clone());

        Self {
            tenant,
            directory,
            tenant_authz: TenantAuthorizer::new(tenant_pool, query_timeout),
            vault,
            cache,
            resolver,
            query_timeout,
        }
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub fn tenant_authorizer(&self) -> &TenantAuthorizer {
        &self.tenant_authz
    }

    pub fn pool_cache(&self) -> &PgClientPoolCache {
        &self.cache
    }

    pub async fn authenticate(
        &self,
        token: &str,
        options: RequestOptions,
    ) -> Result<RequestContext, AccessError> {
        self.resolver.resolve(token, options).await
    }

    pub async fn get_client_pool(&self, client_id: ClientId) -> Result<PgPool, AccessError> {
        self.cache.get_pool(client_id).await
    }

    /// Tenant-tier check.
    pub async fn has_permission(&self, user_id: UserId, permission: &str) -> Result<bool, AccessError> {
        self.tenant_authz.has_permission(user_id, permission).await
    }

    /// Client-tier check against `client_id`'s own database.
    pub async fn has_client_permission(
        &self,
        client_id: ClientId,
        user_id: UserId,
        permission: &str,
    ) -> Result<bool, AccessError> {
        let pool = self.cache.get_pool(client_id).await?;
        self.client_authz(pool).has_permission(user_id, permission).await
    }

    pub async fn client_role(
        &self,
        client_id: ClientId,
        user_id: UserId,
    ) -> Result<Option<String>, AccessError> {
        let pool = self.cache.get_pool(client_id).await?;
        self.client_authz(pool).role(user_id).await
    }

    /// Replaces a client's database password and drops its cached pool so
    /// the next request connects with the new one.
    pub async fn rotate_client_password(
        &self,
        client_id: ClientId,
        new_password: &str,
    ) -> Result<(), AccessError> {
        self.vault.rotate_password(client_id, new_password).await?;
        self.cache.remove_pool(client_id).await;
        info!(client_id = %client_id, "Client pool evicted after credential rotation");
        Ok(())
    }

    pub async fn visible_questions(
        &self,
        ctx: &RequestContext,
        audit_id: AuditId,
    ) -> Result<Vec<Question>, AccessError> {
        let pool = ctx.require_client_pool()?.clone();
        ctx.bounded("visible_questions", async {
            self.client_authz(pool.clone())
                .require(ctx.user_id(), permissions::AUDIT_READ)
                .await?;
            self.engine(pool).visible_questions(ctx.user_id(), audit_id).await
        })
        .await
    }

    pub async fn assign_question(
        &self,
        ctx: &RequestContext,
        question_id: QuestionId,
        assignee: UserId,
    ) -> Result<(), AccessError> {
        let pool = ctx.require_client_pool()?.clone();
        ctx.bounded("assign_question", async {
            self.client_authz(pool.clone())
                .require(ctx.user_id(), permissions::QUESTION_ASSIGN)
                .await?;
            self.engine(pool)
                .assign_question(question_id, assignee, ctx.user_id())
                .await
        })
        .await
    }

    /// Who `question_id` is currently delegated to.
    pub async fn question_assignments(
        &self,
        ctx: &RequestContext,
        question_id: QuestionId,
    ) -> Result<Vec<QuestionAssignment>, AccessError> {
        let pool = ctx.require_client_pool()?.clone();
        ctx.bounded("question_assignments", async {
            self.client_authz(pool.clone())
                .require(ctx.user_id(), permissions::QUESTION_ASSIGN)
                .await?;
            self.engine(pool).assignments(question_id).await
        })
        .await
    }

    /// Application modules the caller's client roles expose. Internal staff
    /// have no client modules.
    pub async fn visible_modules(&self, ctx: &RequestContext) -> Result<Vec<AppModule>, AccessError> {
        if ctx.client_id().is_none() {
            return Ok(Vec::new());
        }
        let authz = self.client_authz(ctx.require_client_pool()?.clone());
        ctx.bounded("visible_modules", authz.visible_modules(ctx.user_id()))
            .await
    }

    pub async fn save_draft(
        &self,
        ctx: &RequestContext,
        question_id: QuestionId,
        answer: Value,
    ) -> Result<Submission, AccessError> {
        let pool = ctx.require_client_pool()?.clone();
        ctx.bounded("save_draft", async {
            self.client_authz(pool.clone())
                .require(ctx.user_id(), permissions::SUBMISSION_WRITE)
                .await?;
            self.engine(pool).save_draft(ctx.user_id(), question_id, answer).await
        })
        .await
    }

    pub async fn submit_for_review(
        &self,
        ctx: &RequestContext,
        question_id: QuestionId,
    ) -> Result<Submission, AccessError> {
        let pool = ctx.require_client_pool()?.clone();
        ctx.bounded("submit_for_review", async {
            self.client_authz(pool.clone())
                .require(ctx.user_id(), permissions::SUBMISSION_WRITE)
                .await?;
            self.engine(pool).submit_for_review(ctx.user_id(), question_id).await
        })
        .await
    }

    /// Records a review decision on `client_id`'s question. Internal staff
    /// may review any client when they hold the tenant-tier review
    /// permission; client users only their own client, with the client-tier
    /// one.
    pub async fn review(
        &self,
        ctx: &RequestContext,
        client_id: ClientId,
        question_id: QuestionId,
        action: ReviewAction,
        notes: Option<String>,
    ) -> Result<Submission, AccessError> {
        ctx.bounded("review", async {
            let user_id = ctx.user_id();
            let denied = || {
                tracing::debug!(user_id = %user_id, client_id = %client_id, "Review denied");
                AccessError::PermissionDenied
            };

            // Staff never reach a client database they are not cleared for.
            let pool = match ctx.client_id() {
                Some(own) if own != client_id => return Err(denied()),
                Some(_) => {
                    let pool = ctx.require_client_pool()?.clone();
                    let authorized = self.tenant_may_review(user_id).await?
                        || self
                            .client_authz(pool.clone())
                            .has_permission(user_id, permissions::SUBMISSION_REVIEW)
                            .await?;
                    if !authorized {
                        return Err(denied());
                    }
                    pool
                }
                None => {
                    if !self.tenant_may_review(user_id).await? {
                        return Err(denied());
                    }
                    self.cache.get_pool(client_id).await?
                }
            };

            self.engine(pool)
                .review(user_id, question_id, action, notes)
                .await
        })
        .await
    }

    /// Closes every client pool and the tenant pool.
    pub async fn shutdown(&self) {
        self.cache.close().await;
        self.tenant.close().await;
        info!("Access core shut down");
    }

    async fn tenant_may_review(&self, user_id: UserId) -> Result<bool, AccessError> {
        self.tenant_authz
            .has_permission(user_id, permissions::SUBMISSION_REVIEW)
            .await
    }

    fn client_authz(&self, pool: PgPool) -> ClientAuthorizer {
        ClientAuthorizer::new(pool, self.query_timeout)
    }

    fn engine(&self, pool: PgPool) -> SubmissionEngine {
        SubmissionEngine::new(pool, self.query_timeout)
    }
}
