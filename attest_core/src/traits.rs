use async_trait::async_trait;
use errors::AccessError;

use crate::types::AuthenticatedIdentity;

/// Identity verification collaborator.
///
/// The core never parses or issues tokens itself; it only asks a validator
/// whether a presented token identifies a user.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Returns the authenticated identity, or `AccessError::Unauthenticated`.
    async fn validate(&self, token: &str) -> Result<AuthenticatedIdentity, AccessError>;
}
