//! # Storage Layer
//!
//! Tenant database access, client credential vault, per-client connection
//! pool cache, both authorization tiers and the submission workflow.

pub mod audits;
pub mod authz;
pub mod client_authz;
pub mod connection_cache;
pub mod credential_vault;
pub mod directory;
pub mod encryption;
pub mod postgres;
pub mod submission_workflow;
pub mod submissions;
pub mod tenant_authz;

pub use audits::AuditStore;
pub use authz::PermissionResolver;
pub use client_authz::ClientAuthorizer;
pub use connection_cache::{ClientPoolCache, PgClientPoolCache, PgPoolConnector, PoolConnector};
pub use credential_vault::{
    CredentialSource, CredentialVault, NewClientCredential, ResolvedCredential,
};
pub use directory::{ClientDirectory, TenantDirectory};
pub use encryption::CredentialCipher;
pub use postgres::{
    TenantDatabase, TenantStore, bounded, initialize_client_schema, initialize_tenant_schema,
};
pub use submission_workflow::{SubmissionEvent, SubmissionWorkflow};
pub use submissions::SubmissionEngine;
pub use tenant_authz::TenantAuthorizer;
