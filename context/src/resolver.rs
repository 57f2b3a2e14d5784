//! Turns a bearer token into a [`RequestContext`].
//!
//! Resolution order:
//! 1. Validate the token (failure aborts the request)
//! 2. Look up the user's client in the tenant directory
//! 3. Attach that client's pool from the connection cache, best effort
//!
//! Step 3 never fails the request for a validly authenticated user; a
//! missing pool only surfaces later as `ClientDataUnavailable`. Cancellation
//! and deadline expiry still abort.

use std::sync::Arc;
use std::time::Duration;

use attest_core::TokenValidator;
use errors::AccessError;
use storage::{ClientDirectory, ClientPoolCache, PoolConnector};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::request::{RequestContext, RequestOptions, guarded};

pub struct ContextResolver<C: PoolConnector> {
    validator: Arc<dyn TokenValidator>,
    directory: Arc<dyn ClientDirectory>,
    cache: Arc<ClientPoolCache<C>>,
    default_timeout: Option<Duration>,
}

impl<C: PoolConnector> ContextResolver<C> {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        directory: Arc<dyn ClientDirectory>,
        cache: Arc<ClientPoolCache<C>>,
    ) -> Self {
        Self {
            validator,
            directory,
            cache,
            default_timeout: None,
        }
    }

    /// Budget applied when the caller does not supply one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub async fn resolve(
        &self,
        token: &str,
        options: RequestOptions,
    ) -> Result<RequestContext<C::Pool>, AccessError> {
        let RequestOptions { cancel, timeout } = options;
        let deadline = timeout.or(self.default_timeout).map(|t| Instant::now() + t);

        let identity = guarded(&cancel, deadline, "validate_token", self.validator.validate(token))
            .await
            .map_err(|e| {
                if matches!(e, AccessError::Unauthenticated { .. }) {
                    info!(security_event = "authentication_failed", error = %e, "Rejected token");
                }
                e
            })?;

        let client_id = guarded(
            &cancel,
            deadline,
            "lookup_client",
            self.directory.client_for_user(identity.user_id),
        )
        .await?;

        let user_id = identity.user_id;
        let ctx = RequestContext::new(identity, cancel.clone(), deadline);
        let Some(client_id) = client_id else {
            debug!(user_id = %user_id, "Resolved internal user context");
            return Ok(ctx);
        };

        let pool = match guarded(
            &cancel,
            deadline,
            "attach_client_pool",
            self.cache.get_pool_with_cancel(client_id, &cancel),
        )
        .await
        {
            Ok(pool) => Some(pool),
            // Only this request's own cancellation or budget aborts; an inner
            // timeout is just another unavailable client.
            Err(e) if cancel.is_cancelled() || deadline.is_some_and(|d| d <= Instant::now()) => {
                return Err(e);
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    client_id = %client_id,
                    operation = "attach_client_pool",
                    error = %e,
                    "Client data unavailable for authenticated user"
                );
                None
            }
        };

        debug!(user_id = %user_id, client_id = %client_id, attached = pool.is_some(), "Resolved client user context");
        Ok(ctx.with_client(client_id, pool))
    }
}
