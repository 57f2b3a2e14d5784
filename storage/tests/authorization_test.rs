//! Integration tests for both authorization tiers.
//!
//! These tests use the shared PostgreSQL testcontainer and skip when Docker
//! is not available.

use std::time::Duration;

use attest_core::{AppModule, ClientRole, UserId, permissions};
use errors::AccessError;
use sqlx::PgPool;
use storage::{
    ClientAuthorizer, PermissionResolver, TenantAuthorizer, TenantDirectory,
    initialize_client_schema, initialize_tenant_schema,
};
use testing::postgres;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

async fn tenant_pool() -> Option<PgPool> {
    let fixture = postgres().await?;
    let (_, pool) = fixture.create_database("tenant").await.ok()?;
    initialize_tenant_schema(&pool).await.ok()?;
    Some(pool)
}

async fn client_pool() -> Option<PgPool> {
    let fixture = postgres().await?;
    let (_, pool) = fixture.create_database("client").await.ok()?;
    initialize_client_schema(&pool).await.ok()?;
    Some(pool)
}

#[tokio::test]
async fn test_tenant_permission_lifecycle() {
    let Some(pool) = tenant_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let directory = TenantDirectory::new(pool.clone(), QUERY_TIMEOUT);
    let authz = TenantAuthorizer::new(pool.clone(), QUERY_TIMEOUT);
    let staff = directory.register_user("auditor@platform.test", None).await.unwrap();

    assert!(!authz.has_permission(staff, "clients.provision").await.unwrap());
    assert_eq!(authz.role(staff).await.unwrap(), None);

    authz.grant_permission("platform_admin", "clients.provision").await.unwrap();
    authz.assign_role(staff, "platform_admin").await.unwrap();
    assert!(authz.has_permission(staff, "clients.provision").await.unwrap());
    assert_eq!(authz.role(staff).await.unwrap().as_deref(), Some("platform_admin"));

    assert!(authz.revoke_permission("platform_admin", "clients.provision").await.unwrap());
    assert!(
        !authz.has_permission(staff, "clients.provision").await.unwrap(),
        "revocation must take effect on the next check"
    );
}

#[tokio::test]
async fn test_tenant_role_revocation_is_immediate() {
    let Some(pool) = tenant_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let directory = TenantDirectory::new(pool.clone(), QUERY_TIMEOUT);
    let authz = TenantAuthorizer::new(pool, QUERY_TIMEOUT);
    let staff = directory.register_user("reviewer@platform.test", None).await.unwrap();

    authz.grant_permission("platform_reviewer", permissions::SUBMISSION_REVIEW).await.unwrap();
    authz.assign_role(staff, "platform_reviewer").await.unwrap();
    authz.require(staff, permissions::SUBMISSION_REVIEW).await.unwrap();

    assert!(authz.revoke_role(staff, "platform_reviewer").await.unwrap());
    assert!(matches!(
        authz.require(staff, permissions::SUBMISSION_REVIEW).await,
        Err(AccessError::PermissionDenied)
    ));
}

#[tokio::test]
async fn test_unreachable_store_is_an_error_not_a_grant() {
    let Some(pool) = tenant_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let authz = TenantAuthorizer::new(pool.clone(), QUERY_TIMEOUT);
    pool.close().await;

    let result = authz.has_permission(UserId::generate(), "clients.provision").await;
    assert!(matches!(result, Err(AccessError::Database { .. })));
    assert!(authz.require_any(UserId::generate(), &["clients.provision"]).await.is_err());
}

#[tokio::test]
async fn test_client_default_roles() {
    let Some(pool) = client_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let authz = ClientAuthorizer::new(pool, QUERY_TIMEOUT);
    authz.seed_default_roles().await.unwrap();
    authz.seed_default_roles().await.unwrap();

    let stakeholder = UserId::generate();
    authz.assign_role(stakeholder, ClientRole::Stakeholder.as_ref()).await.unwrap();
    assert!(authz.has_permission(stakeholder, permissions::SUBMISSION_WRITE).await.unwrap());
    assert!(!authz.has_permission(stakeholder, permissions::SUBMISSION_REVIEW).await.unwrap());
    assert!(!authz.sees_all_questions(stakeholder).await.unwrap());
    assert_eq!(authz.role(stakeholder).await.unwrap().as_deref(), Some("stakeholder"));

    let poc = UserId::generate();
    authz.assign_role(poc, ClientRole::PointOfContact.as_ref()).await.unwrap();
    authz.assign_role(poc, ClientRole::Viewer.as_ref()).await.unwrap();
    assert!(authz.sees_all_questions(poc).await.unwrap());
    assert_eq!(
        authz.client_roles(poc).await.unwrap(),
        vec![ClientRole::PointOfContact, ClientRole::Viewer]
    );
    assert_eq!(authz.role(poc).await.unwrap().as_deref(), Some("point_of_contact"));

    authz
        .require_all(poc, &[permissions::AUDIT_READ, permissions::QUESTION_ASSIGN])
        .await
        .unwrap();
    assert!(authz.require_all(poc, &[]).await.is_err());

    assert_eq!(
        authz.visible_modules(poc).await.unwrap(),
        vec![
            AppModule::Dashboard,
            AppModule::Audits,
            AppModule::Questions,
            AppModule::Evidence,
            AppModule::Reports,
        ]
    );
    assert_eq!(
        authz.visible_modules(stakeholder).await.unwrap(),
        vec![AppModule::Dashboard, AppModule::Questions, AppModule::Evidence]
    );

    let nobody = UserId::generate();
    assert!(authz.visible_modules(nobody).await.unwrap().is_empty());
    assert_eq!(authz.role(nobody).await.unwrap(), None);
    assert!(!authz.has_permission(nobody, permissions::AUDIT_READ).await.unwrap());
}

#[tokio::test]
async fn test_client_defined_role() {
    let Some(pool) = client_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let authz = ClientAuthorizer::new(pool, QUERY_TIMEOUT);
    authz.create_role("compliance_lead", Some("Owns SOC 2")).await.unwrap();
    authz.grant_permission("compliance_lead", permissions::SUBMISSION_REVIEW).await.unwrap();

    let lead = UserId::generate();
    authz.assign_role(lead, "compliance_lead").await.unwrap();
    assert!(authz.has_permission(lead, permissions::SUBMISSION_REVIEW).await.unwrap());
    assert_eq!(authz.role(lead).await.unwrap().as_deref(), Some("compliance_lead"));
    assert!(
        !authz.sees_all_questions(lead).await.unwrap(),
        "custom roles do not widen question visibility"
    );

    authz.revoke_permission("compliance_lead", permissions::SUBMISSION_REVIEW).await.unwrap();
    assert!(!authz.has_permission(lead, permissions::SUBMISSION_REVIEW).await.unwrap());
}

#[tokio::test]
async fn test_failed_seed_leaves_no_partial_roles() {
    let Some(pool) = client_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    sqlx::query("DROP TABLE role_permissions").execute(&pool).await.unwrap();

    let authz = ClientAuthorizer::new(pool.clone(), QUERY_TIMEOUT);
    assert!(matches!(
        authz.seed_default_roles().await,
        Err(AccessError::Database { .. })
    ));

    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(roles, 0);
}

#[tokio::test]
async fn test_writes_are_bounded_by_query_timeout() {
    let Some(pool) = tenant_pool().await else {
        eprintln!("Skipping authorization test: Docker not available");
        return;
    };
    let mut holder = pool.begin().await.unwrap();
    sqlx::query("LOCK TABLE tenant_roles IN ACCESS EXCLUSIVE MODE")
        .execute(&mut *holder)
        .await
        .unwrap();

    let authz = TenantAuthorizer::new(pool.clone(), Duration::from_millis(200));
    let result = authz.grant_permission("platform_admin", "clients.provision").await;
    match result {
        Err(AccessError::Timeout { operation, timeout_ms }) => {
            assert_eq!(operation, "grant_tenant_permission");
            assert_eq!(timeout_ms, 200);
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    holder.rollback().await.unwrap();
    authz.grant_permission("platform_admin", "clients.provision").await.unwrap();
}
