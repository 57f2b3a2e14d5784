//! HS256 bearer tokens identifying a platform user.

use async_trait::async_trait;
use attest_core::{AuthenticatedIdentity, TokenValidator, UserId};
use chrono::{Duration, Utc};
use config::AuthConfig;
use errors::AccessError;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (platform user id)
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub struct JwtTokenValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    leeway_seconds: u64,
}

fn unauthenticated(reason: impl Into<String>) -> AccessError {
    AccessError::Unauthenticated {
        reason: reason.into(),
    }
}

impl JwtTokenValidator {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            leeway_seconds: 0,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AccessError> {
        let secret = config
            .jwt_secret
            .as_deref()
            .ok_or_else(|| AccessError::Configuration {
                message: "ATTEST_JWT_SECRET is not set".to_string(),
            })?;
        let mut validator = Self::new(secret.as_bytes(), &config.issuer, &config.audience);
        validator.leeway_seconds = config.leeway_seconds;
        Ok(validator)
    }

    /// Issues a token for `user_id`, valid for `ttl`.
    pub fn issue(&self, user_id: UserId, email: &str, ttl: Duration) -> Result<String, AccessError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AccessError::Configuration {
            message: format!("failed to sign token: {e}"),
        })
    }

    fn verify(&self, token: &str) -> Result<AuthenticatedIdentity, AccessError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = self.leeway_seconds;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => unauthenticated("token expired"),
                _ => unauthenticated(format!("invalid token: {e}")),
            }
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| unauthenticated("subject is not a user id"))?;

        Ok(AuthenticatedIdentity {
            user_id,
            email: data.claims.email,
        })
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedIdentity, AccessError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(unauthenticated("missing token"));
        }
        self.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> JwtTokenValidator {
        JwtTokenValidator::new(b"test-secret-key-for-testing-only!!", "attest", "attest-api")
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let v = validator();
        let user = UserId::generate();
        let token = v.issue(user, "poc@acme.test", Duration::hours(1)).unwrap();

        let identity = v.validate(&token).await.unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.email, "poc@acme.test");

        let bearer = format!("Bearer {token}");
        assert_eq!(v.validate(&bearer).await.unwrap().user_id, user);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let v = validator();
        let token = v.issue(UserId::generate(), "a@b.test", Duration::hours(-1)).unwrap();
        match v.validate(&token).await {
            Err(AccessError::Unauthenticated { reason }) => assert_eq!(reason, "token expired"),
            other => panic!("expected unauthenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_and_audience_rejected() {
        let token = validator().issue(UserId::generate(), "a@b.test", Duration::hours(1)).unwrap();

        let other_secret = JwtTokenValidator::new(b"another-secret-key-entirely-000000", "attest", "attest-api");
        assert!(matches!(
            other_secret.validate(&token).await,
            Err(AccessError::Unauthenticated { .. })
        ));

        let other_audience = JwtTokenValidator::new(b"test-secret-key-for-testing-only!!", "attest", "admin-api");
        assert!(other_audience.validate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_and_empty_tokens() {
        let v = validator();
        assert!(v.validate("").await.is_err());
        assert!(v.validate("Bearer ").await.is_err());
        assert!(v.validate("not.a.jwt").await.is_err());
    }

    #[test]
    fn test_from_config_requires_secret() {
        assert!(JwtTokenValidator::from_config(&AuthConfig::default()).is_err());
    }
}
