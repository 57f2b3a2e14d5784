//! # Attest Core
//!
//! Shared types, traits, and role tables for the Attest data-access and
//! authorization core.
//!
//! This crate provides:
//! - Identifier newtypes with explicit width validation
//! - Data model for tenants, clients, audits, questions, and submissions
//! - The closed client-role enum and its module visibility table
//! - Collaborator traits consumed by the core (token validation)

pub mod roles;
pub mod traits;
pub mod types;

pub use roles::{AppModule, ClientRole, permissions};
pub use traits::TokenValidator;
pub use types::{
    Audit, AuditId, AuditStatus, AuthenticatedIdentity, ClientDatabaseCredential, ClientId,
    Question, QuestionAssignment, QuestionId, QuestionType, ReviewAction, Submission,
    SubmissionId, SubmissionStatus, TenantUser, UserId,
};
