use axum_storefront_api::config::{AppConfig, GatewayConfig};
use axum_storefront_api::error::AppError;
use axum_storefront_api::kv::MemoryStore;
use axum_storefront_api::services::token_service::{self, TokenSubject};
use uuid::Uuid;

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        redis_url: "redis://unused".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: "rotation-test-secret".to_string(),
        access_token_ttl_secs: 3 * 60 * 60,
        refresh_token_ttl_secs: 3 * 60 * 60,
        gateway: GatewayConfig {
            base_url: "https://sandbox.gateway.example/pay".to_string(),
            merchant_code: "MERCH01".to_string(),
            hash_secret: "topsecret".to_string(),
            return_url: "http://localhost:3000/api/payments/return".to_string(),
            currency: "VND".to_string(),
            locale: "vn".to_string(),
        },
        smtp: None,
        recommendation_url: None,
    }
}

fn subject() -> TokenSubject {
    TokenSubject {
        user_id: Uuid::new_v4(),
        email: "user@example.com".to_string(),
        role: "user".to_string(),
    }
}

#[tokio::test]
async fn refresh_is_single_use() {
    let config = test_config();
    let kv = MemoryStore::new();

    let pair = token_service::issue(&config, &kv, &subject()).await.unwrap();

    let rotated = token_service::refresh(&config, &kv, &pair.refresh_token)
        .await
        .expect("first refresh succeeds");
    assert_ne!(rotated.refresh_token, pair.refresh_token);

    // The same token a second time has already been rotated away.
    let replay = token_service::refresh(&config, &kv, &pair.refresh_token).await;
    assert!(matches!(replay, Err(AppError::Unauthorized)));

    // The freshly issued token still works.
    token_service::refresh(&config, &kv, &rotated.refresh_token)
        .await
        .expect("rotated token refreshes");
}

#[tokio::test]
async fn issuing_again_invalidates_the_previous_refresh_token() {
    let config = test_config();
    let kv = MemoryStore::new();
    let subject = subject();

    let first = token_service::issue(&config, &kv, &subject).await.unwrap();
    let _second = token_service::issue(&config, &kv, &subject).await.unwrap();

    let result = token_service::refresh(&config, &kv, &first.refresh_token).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn garbage_and_foreign_tokens_are_rejected_alike() {
    let config = test_config();
    let kv = MemoryStore::new();

    let garbage = token_service::refresh(&config, &kv, "not-a-token").await;
    assert!(matches!(garbage, Err(AppError::Unauthorized)));

    // A structurally valid token signed with a different key.
    let mut foreign_config = test_config();
    foreign_config.jwt_secret = "some-other-secret".to_string();
    let foreign_kv = MemoryStore::new();
    let foreign = token_service::issue(&foreign_config, &foreign_kv, &subject())
        .await
        .unwrap();

    let result = token_service::refresh(&config, &kv, &foreign.refresh_token).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn revoked_tokens_cannot_refresh() {
    let config = test_config();
    let kv = MemoryStore::new();
    let subject = subject();

    let pair = token_service::issue(&config, &kv, &subject).await.unwrap();
    token_service::revoke(&kv, subject.user_id).await.unwrap();

    let result = token_service::refresh(&config, &kv, &pair.refresh_token).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn bearer_prefix_is_tolerated() {
    let config = test_config();
    let kv = MemoryStore::new();

    let pair = token_service::issue(&config, &kv, &subject()).await.unwrap();
    let presented = format!("Bearer {}", pair.refresh_token);

    token_service::refresh(&config, &kv, &presented)
        .await
        .expect("prefixed token refreshes");
}

#[tokio::test]
async fn expired_store_entry_is_rejected() {
    let mut config = test_config();
    // TTL of zero: the stored entry is gone by the time it is presented.
    config.refresh_token_ttl_secs = 0;
    let kv = MemoryStore::new();

    let pair = token_service::issue(&config, &kv, &subject()).await.unwrap();
    let result = token_service::refresh(&config, &kv, &pair.refresh_token).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}
