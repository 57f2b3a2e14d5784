use async_trait::async_trait;
use attest_core::UserId;
use errors::AccessError;

/// Permission checks against one authorization tier.
///
/// Every check reads the backing store; nothing is cached, so a revoked
/// grant denies on the very next call. Store errors propagate as errors and
/// are never turned into a grant.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn has_permission(&self, user_id: UserId, permission: &str) -> Result<bool, AccessError>;

    /// Name of a role the user holds, if any.
    async fn role(&self, user_id: UserId) -> Result<Option<String>, AccessError>;

    async fn require(&self, user_id: UserId, permission: &str) -> Result<(), AccessError> {
        if self.has_permission(user_id, permission).await? {
            Ok(())
        } else {
            tracing::debug!(user_id = %user_id, permission, "Permission denied");
            Err(AccessError::PermissionDenied)
        }
    }

    /// Succeeds if the user holds at least one of `permissions`. An empty
    /// list denies.
    async fn require_any(&self, user_id: UserId, permissions: &[&str]) -> Result<(), AccessError> {
        for permission in permissions {
            if self.has_permission(user_id, permission).await? {
                return Ok(());
            }
        }
        tracing::debug!(user_id = %user_id, ?permissions, "No listed permission held");
        Err(AccessError::PermissionDenied)
    }

    /// Succeeds only if the user holds every one of `permissions`. An empty
    /// list denies.
    async fn require_all(&self, user_id: UserId, permissions: &[&str]) -> Result<(), AccessError> {
        if permissions.is_empty() {
            return Err(AccessError::PermissionDenied);
        }
        for permission in permissions {
            if !self.has_permission(user_id, permission).await? {
                tracing::debug!(user_id = %user_id, permission, "Missing required permission");
                return Err(AccessError::PermissionDenied);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Granted {
        user: UserId,
        permissions: HashSet<&'static str>,
        broken: bool,
    }

    #[async_trait]
    impl PermissionResolver for Granted {
        async fn has_permission(&self, user_id: UserId, permission: &str) -> Result<bool, AccessError> {
            if self.broken {
                return Err(AccessError::database("has_permission", "connection reset"));
            }
            Ok(user_id == self.user && self.permissions.contains(permission))
        }

        async fn role(&self, _user_id: UserId) -> Result<Option<String>, AccessError> {
            Ok(None)
        }
    }

    fn resolver(permissions: &[&'static str]) -> Granted {
        Granted {
            user: UserId::generate(),
            permissions: permissions.iter().copied().collect(),
            broken: false,
        }
    }

    #[tokio::test]
    async fn test_require_any() {
        let r = resolver(&["audits.read"]);
        assert!(r.require_any(r.user, &["reports.view", "audits.read"]).await.is_ok());
        assert!(matches!(
            r.require_any(r.user, &["reports.view"]).await,
            Err(AccessError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_require_all() {
        let r = resolver(&["audits.read", "reports.view"]);
        assert!(r.require_all(r.user, &["audits.read", "reports.view"]).await.is_ok());
        assert!(r.require_all(r.user, &["audits.read", "users.manage"]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_permission_list_denies() {
        let r = resolver(&["audits.read"]);
        assert!(matches!(
            r.require_any(r.user, &[]).await,
            Err(AccessError::PermissionDenied)
        ));
        assert!(matches!(
            r.require_all(r.user, &[]).await,
            Err(AccessError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_store_error_is_not_a_grant() {
        let mut r = resolver(&["audits.read"]);
        r.broken = true;
        let result = r.require(r.user, "audits.read").await;
        assert!(matches!(result, Err(AccessError::Database { .. })));
        assert!(r.require_any(r.user, &["audits.read"]).await.is_err());
    }

    #[tokio::test]
    async fn test_other_user_denied() {
        let r = resolver(&["audits.read"]);
        assert!(r.require(UserId::generate(), "audits.read").await.is_err());
    }
}
