use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::auth::{Claims, TokenPair},
    error::{AppError, AppResult},
    kv::KeyValueStore,
};

/// The identity a token pair is issued for.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

fn refresh_store_key(user_id: Uuid) -> String {
    format!("refresh:{user_id}")
}

/// Issue a fresh access/refresh pair.
///
/// The refresh token is written to the key-value store under
/// `refresh:<user_id>` with a TTL equal to its validity window, overwriting
/// whatever was there. At most one refresh token is live per user at any
/// instant.
pub async fn issue(
    config: &AppConfig,
    kv: &dyn KeyValueStore,
    subject: &TokenSubject,
) -> AppResult<TokenPair> {
    let now = Utc::now();

    let access_token = encode_token(
        &config.jwt_secret,
        &Claims {
            sub: subject.email.clone(),
            uid: subject.user_id,
            role: subject.role.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(config.access_token_ttl_secs)).timestamp(),
        },
    )?;

    let refresh_token = encode_token(
        &config.jwt_secret,
        &Claims {
            sub: subject.email.clone(),
            uid: subject.user_id,
            role: subject.role.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(config.refresh_token_ttl_secs)).timestamp(),
        },
    )?;

    kv.set_with_ttl(
        &refresh_store_key(subject.user_id),
        &refresh_token,
        StdDuration::from_secs(config.refresh_token_ttl_secs.max(0) as u64),
    )
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Rotate a refresh token: verify it, check it is the one currently stored
/// for its user, delete the stored entry, and re-issue a pair for the same
/// subject.
///
/// Every verification failure collapses into the same `Unauthorized`
/// rejection so callers cannot distinguish why a token was refused. A token
/// that was already rotated away no longer matches the stored value, which
/// makes refresh single-use.
pub async fn refresh(
    config: &AppConfig,
    kv: &dyn KeyValueStore,
    presented: &str,
) -> AppResult<TokenPair> {
    let token = presented
        .strip_prefix("Bearer ")
        .unwrap_or(presented)
        .trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    // Signature and expiry are checked here; the stored copy is the same
    // string, so its expiry is covered by the same check (and by the TTL).
    let claims = decode_claims(&config.jwt_secret, token).map_err(|_| AppError::Unauthorized)?;

    let key = refresh_store_key(claims.uid);
    match kv.get(&key).await? {
        Some(stored) if stored == token => {}
        _ => return Err(AppError::Unauthorized),
    }

    kv.del(&key).await?;

    let subject = TokenSubject {
        user_id: claims.uid,
        email: claims.sub,
        role: claims.role,
    };
    issue(config, kv, &subject).await
}

/// Drop a user's stored refresh token, ending the session server-side.
pub async fn revoke(kv: &dyn KeyValueStore, user_id: Uuid) -> AppResult<()> {
    kv.del(&refresh_store_key(user_id)).await?;
    Ok(())
}

fn encode_token(secret: &str, claims: &Claims) -> AppResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn decode_claims(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
