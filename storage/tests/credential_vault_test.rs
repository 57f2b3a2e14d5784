use std::sync::Arc;
use std::time::Duration;

use attest_core::ClientId;
use errors::AccessError;
use sqlx::PgPool;
use storage::{
    CredentialCipher, CredentialSource, CredentialVault, NewClientCredential, TenantDirectory,
    initialize_tenant_schema,
};
use testing::{postgres, unique_id};
use zeroize::Zeroizing;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

struct Setup {
    pool: PgPool,
    vault: CredentialVault,
    client_id: ClientId,
}

async fn setup() -> Option<Setup> {
    let fixture = postgres().await?;
    let (_, pool) = fixture.create_database("vault").await.ok()?;
    initialize_tenant_schema(&pool).await.ok()?;

    let directory = TenantDirectory::new(pool.clone(), QUERY_TIMEOUT);
    let client_id = directory.register_client(&unique_id("acme")).await.ok()?;
    let cipher = Arc::new(CredentialCipher::new(&[42u8; 32]));
    let vault = CredentialVault::new(pool.clone(), cipher, QUERY_TIMEOUT);
    Some(Setup {
        pool,
        vault,
        client_id,
    })
}

fn credential(client_id: ClientId, password: &str) -> NewClientCredential {
    NewClientCredential {
        client_id,
        host: "client-db.internal".to_string(),
        port: 5433,
        database: "acme".to_string(),
        username: "acme_app".to_string(),
        password: Zeroizing::new(password.to_string()),
        schema_version: 1,
    }
}

#[tokio::test]
async fn test_store_and_resolve_credential() {
    let Some(s) = setup().await else {
        eprintln!("Skipping credential vault test: Docker not available");
        return;
    };
    s.vault.store_credential(credential(s.client_id, "correct horse")).await.unwrap();

    let stored = s.vault.get_credential(s.client_id).await.unwrap();
    assert_eq!(stored.port, 5433);
    assert_ne!(stored.encrypted_password, "correct horse");

    let resolved = s.vault.resolve(s.client_id).await.unwrap();
    assert_eq!(resolved.password.as_str(), "correct horse");
    assert_eq!(resolved.database, "acme");
    assert_eq!(s.vault.list_client_ids().await.unwrap(), vec![s.client_id]);
}

#[tokio::test]
async fn test_missing_credential_is_not_found() {
    let Some(s) = setup().await else {
        eprintln!("Skipping credential vault test: Docker not available");
        return;
    };
    let result = s.vault.resolve(ClientId::generate()).await;
    assert!(matches!(result, Err(AccessError::NotFound { .. })));
}

#[tokio::test]
async fn test_tampered_ciphertext_is_rejected() {
    let Some(s) = setup().await else {
        eprintln!("Skipping credential vault test: Docker not available");
        return;
    };
    s.vault.store_credential(credential(s.client_id, "pw")).await.unwrap();

    let stored = s.vault.get_credential(s.client_id).await.unwrap();
    let mut chars: Vec<char> = stored.encrypted_password.chars().collect();
    let idx = chars.len() / 2;
    chars[idx] = if chars[idx] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    sqlx::query("UPDATE client_database_credentials SET encrypted_password = $2 WHERE client_id = $1")
        .bind(s.client_id.as_uuid())
        .bind(&tampered)
        .execute(&s.pool)
        .await
        .unwrap();

    let result = s.vault.resolve(s.client_id).await;
    match result {
        Err(e @ AccessError::CorruptCiphertext { .. }) => assert!(e.is_security_event()),
        other => panic!("expected corrupt ciphertext, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rotate_and_delete() {
    let Some(s) = setup().await else {
        eprintln!("Skipping credential vault test: Docker not available");
        return;
    };
    s.vault.store_credential(credential(s.client_id, "old")).await.unwrap();
    s.vault.rotate_password(s.client_id, "new").await.unwrap();
    assert_eq!(s.vault.resolve(s.client_id).await.unwrap().password.as_str(), "new");

    assert!(matches!(
        s.vault.rotate_password(ClientId::generate(), "x").await,
        Err(AccessError::NotFound { .. })
    ));

    assert!(s.vault.delete_credential(s.client_id).await.unwrap());
    assert!(!s.vault.delete_credential(s.client_id).await.unwrap());
    assert!(s.vault.list_client_ids().await.unwrap().is_empty());
}
