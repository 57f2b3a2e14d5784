//! Per-request access context for attest.
//!
//! This crate turns a bearer token into a [`RequestContext`] carrying:
//!
//! 1. The authenticated platform identity
//! 2. The client the user belongs to, if any
//! 3. That client's connection pool, attached best effort
//! 4. A cancellation token and optional deadline bounding every operation
//!
//! [`AccessCore`] wires the tenant database, credential vault, pool cache
//! and both authorization tiers together and exposes the submission
//! workflow with authorization applied before any data access.
//!
//! # Example
//!
//! ```rust,ignore
//! use context::{AccessCore, JwtTokenValidator, RequestOptions};
//!
//! let validator = Arc::new(JwtTokenValidator::from_config(&config.auth)?);
//! let core = AccessCore::connect(&config, validator).await?;
//! let ctx = core.authenticate(token, RequestOptions::default()).await?;
//! let draft = core.save_draft(&ctx, question_id, json!("yes")).await?;
//! ```

mod jwt;
mod request;
mod resolver;
mod service;

pub use jwt::{Claims, JwtTokenValidator};
pub use request::{RequestContext, RequestOptions};
pub use resolver::ContextResolver;
pub use service::AccessCore;
