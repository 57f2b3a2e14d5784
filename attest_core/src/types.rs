use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use errors::AccessError;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

const UUID_WIDTH: usize = 16;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Builds an identifier from raw column bytes.
            ///
            /// The width is checked up front; a short or long buffer is an
            /// error, never a truncation.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, AccessError> {
                let raw: [u8; UUID_WIDTH] =
                    bytes
                        .try_into()
                        .map_err(|_| AccessError::InvalidIdentifier {
                            kind: $kind.to_string(),
                            reason: format!(
                                "expected {} bytes, got {}",
                                UUID_WIDTH,
                                bytes.len()
                            )
                        })?;
                Ok(Self(Uuid::from_bytes(raw)))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = AccessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| AccessError::InvalidIdentifier {
                        kind: $kind.to_string(),
                        reason: e.to_string()
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_identifier!(
    /// Identifier of a platform customer owning an isolated database.
    ClientId,
    "client"
);
uuid_identifier!(
    /// Platform-wide user identity, shared by tenant and client tiers.
    UserId,
    "user"
);
uuid_identifier!(AuditId, "audit");
uuid_identifier!(QuestionId, "question");
uuid_identifier!(SubmissionId, "submission");

/// Result of a successful token validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub user_id: UserId,
    pub email: String,
}

/// Platform-wide identity. Client-scoped users carry the client they belong
/// to; internal staff carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUser {
    pub id: UserId,
    pub email: String,
    pub client_id: Option<ClientId>,
}

/// Connection parameters for one client database as stored in the tenant
/// database. The password is only ever held encrypted here.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDatabaseCredential {
    pub client_id: ClientId,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub encrypted_password: String,
    pub schema_version: i32,
}

impl fmt::Debug for ClientDatabaseCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientDatabaseCredential")
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("encrypted_password", &"<redacted>")
            .field("schema_version", &self.schema_version)
            .finish()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditStatus {
    NotStarted,
    InProgress,
    InReview,
    Completed,
    Overdue,
}

/// One compliance-framework assignment to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub id: AuditId,
    pub framework: String,
    pub assignee: Option<UserId>,
    pub due_date: Option<NaiveDate>,
    pub status: AuditStatus,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionType {
    YesNo,
    FreeText,
    MultipleChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub audit_id: AuditId,
    pub prompt: String,
    pub question_type: QuestionType,
    pub mandatory: bool,
    pub position: i32,
}

/// Delegation of a question to a single client user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAssignment {
    pub question_id: QuestionId,
    pub user_id: UserId,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    NotStarted,
    InProgress,
    Submitted,
    Approved,
    Rejected,
    Referred,
}

impl SubmissionStatus {
    /// Approved submissions accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Approved)
    }
}

/// The answer record for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub question_id: QuestionId,
    pub answer: serde_json::Value,
    pub submitted_by: UserId,
    pub status: SubmissionStatus,
    pub reviewer: Option<UserId>,
    pub review_notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reviewer decision on a submitted answer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReviewAction {
    Approve,
    Reject,
    #[strum(to_string = "refer", serialize = "referred")]
    Refer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_from_bytes_roundtrip() {
        let id = ClientId::generate();
        let restored = ClientId::from_bytes(id.as_uuid().as_bytes()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_client_id_from_bytes_rejects_wrong_width() {
        let short = ClientId::from_bytes(&[0u8; 8]);
        assert!(matches!(
            short,
            Err(AccessError::InvalidIdentifier { ref kind, .. }) if kind == "client"
        ));

        let long = ClientId::from_bytes(&[0u8; 20]);
        assert!(long.is_err());
    }

    #[test]
    fn test_identifier_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
        let id = UserId::generate();
        assert_eq!(id.to_string().parse::<UserId>().unwrap(), id);
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = ClientDatabaseCredential {
            client_id: ClientId::generate(),
            host: "db.internal".to_string(),
            port: 5432,
            database: "client_db".to_string(),
            username: "client_user".to_string(),
            encrypted_password: "c2VjcmV0".to_string(),
            schema_version: 1,
        };
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("c2VjcmV0"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SubmissionStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            "referred".parse::<SubmissionStatus>().unwrap(),
            SubmissionStatus::Referred
        );
        assert_eq!(AuditStatus::InReview.as_ref(), "in_review");
    }

    #[test]
    fn test_review_action_aliases() {
        assert_eq!("approve".parse::<ReviewAction>().unwrap(), ReviewAction::Approve);
        assert_eq!("Reject".parse::<ReviewAction>().unwrap(), ReviewAction::Reject);
        assert_eq!("referred".parse::<ReviewAction>().unwrap(), ReviewAction::Refer);
        assert_eq!("refer".parse::<ReviewAction>().unwrap(), ReviewAction::Refer);
        assert!("escalate".parse::<ReviewAction>().is_err());
    }
}
