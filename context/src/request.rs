use std::future::Future;
use std::time::Duration;

use attest_core::{AuthenticatedIdentity, ClientId, UserId};
use errors::AccessError;
use sqlx::PgPool;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request knobs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub cancel: CancellationToken,
    /// Overall budget for the request, measured from resolution.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Runs `fut` until it completes, `cancel` fires, or `deadline` passes,
/// whichever comes first.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    operation: &str,
    fut: F,
) -> Result<T, AccessError>
where
    F: Future<Output = Result<T, AccessError>>,
{
    let timed = async {
        match deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(AccessError::Timeout {
                        operation: operation.to_string(),
                        timeout_ms: budget.as_millis() as u64,
                    }),
                }
            }
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AccessError::Cancelled {
            operation: operation.to_string(),
        }),
        result = timed => result,
    }
}

/// Everything an operation needs to know about the caller.
///
/// Built once per request and never mutated afterwards. A client user whose
/// pool could not be attached still gets a context; only operations that
/// need client data fail, with [`AccessError::ClientDataUnavailable`].
#[derive(Debug, Clone)]
pub struct RequestContext<P = PgPool> {
    identity: AuthenticatedIdentity,
    client_id: Option<ClientId>,
    client_pool: Option<P>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl<P> RequestContext<P> {
    pub fn new(
        identity: AuthenticatedIdentity,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            identity,
            client_id: None,
            client_pool: None,
            cancel,
            deadline,
        }
    }

    /// Marks the context as belonging to `client_id`, with or without a pool.
    pub fn with_client(mut self, client_id: ClientId, pool: Option<P>) -> Self {
        self.client_id = Some(client_id);
        self.client_pool = pool;
        self
    }

    pub fn identity(&self) -> &AuthenticatedIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    pub fn email(&self) -> &str {
        &self.identity.email
    }

    /// `None` for internal staff.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn client_pool(&self) -> Option<&P> {
        self.client_pool.as_ref()
    }

    pub fn require_client_pool(&self) -> Result<&P, AccessError> {
        self.client_pool
            .as_ref()
            .ok_or(AccessError::ClientDataUnavailable)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Runs `fut` under this request's cancellation token and deadline.
    pub async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, AccessError>
    where
        F: Future<Output = Result<T, AccessError>>,
    {
        guarded(&self.cancel, self.deadline, operation, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            user_id: UserId::generate(),
            email: "user@client.test".to_string(),
        }
    }

    #[test]
    fn test_staff_context_has_no_client_data() {
        let ctx: RequestContext<u32> = RequestContext::new(identity(), CancellationToken::new(), None);
        assert_eq!(ctx.client_id(), None);
        assert!(matches!(
            ctx.require_client_pool(),
            Err(AccessError::ClientDataUnavailable)
        ));
    }

    #[test]
    fn test_client_context_without_pool() {
        let client = ClientId::generate();
        let ctx: RequestContext<u32> =
            RequestContext::new(identity(), CancellationToken::new(), None).with_client(client, None);
        assert_eq!(ctx.client_id(), Some(client));
        assert!(ctx.client_pool().is_none());
        assert!(ctx.require_client_pool().is_err());

        let attached = ctx.with_client(client, Some(7));
        assert_eq!(attached.require_client_pool().unwrap(), &7);
    }

    #[tokio::test]
    async fn test_bounded_observes_cancellation() {
        let cancel = CancellationToken::new();
        let ctx: RequestContext<()> = RequestContext::new(identity(), cancel.clone(), None);
        cancel.cancel();

        let result = ctx
            .bounded("load_audit", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AccessError>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(AccessError::Cancelled { ref operation }) if operation == "load_audit"
        ));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_observes_deadline() {
        let deadline = Instant::now() + Duration::from_millis(100);
        let ctx: RequestContext<()> =
            RequestContext::new(identity(), CancellationToken::new(), Some(deadline));

        let result = ctx
            .bounded("list_questions", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AccessError>(())
            })
            .await;
        assert!(matches!(result, Err(AccessError::Timeout { .. })));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let ctx: RequestContext<()> = RequestContext::new(identity(), CancellationToken::new(), None);
        let value = ctx.bounded("noop", async { Ok::<_, AccessError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
