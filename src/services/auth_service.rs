use std::time::Duration;

use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use password_hash::rand_core::OsRng;
use rand::Rng;
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest, TokenPair,
    },
    error::{AppError, AppResult},
    models::User,
    notify,
    response::{ApiResponse, Meta},
    services::token_service,
    state::AppState,
};

const RESET_CODE_TTL: Duration = Duration::from_secs(10 * 60);

fn reset_store_key(email: &str) -> String {
    format!("reset:{email}")
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let RegisterRequest { email, password } = payload;
    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    if exist.is_some() {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    let password_hash = hash_password(&password)?;
    let id = Uuid::new_v4();

    let user: User = sqlx::query_as(
        "INSERT INTO users (id, email, password_hash) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(id)
    .bind(email.as_str())
    .bind(password_hash)
    .fetch_one(&state.pool)
    .await?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_register",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await;

    Ok(ApiResponse::success("User created", user, None))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<TokenPair>> {
    let LoginRequest { email, password } = payload;
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or password".into())),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    let argon2 = Argon2::default();
    if argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let subject = token_service::TokenSubject {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role.clone(),
    };
    let tokens = token_service::issue(&state.config, state.kv.as_ref(), &subject).await?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await;

    Ok(ApiResponse::success("Logged in", tokens, Some(Meta::empty())))
}

pub async fn refresh_tokens(
    state: &AppState,
    refresh_token: &str,
) -> AppResult<ApiResponse<TokenPair>> {
    let tokens =
        token_service::refresh(&state.config, state.kv.as_ref(), refresh_token).await?;
    Ok(ApiResponse::success(
        "Tokens rotated",
        tokens,
        Some(Meta::empty()),
    ))
}

pub async fn logout_user(
    state: &AppState,
    user_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    token_service::revoke(state.kv.as_ref(), user_id).await?;

    audit::record(
        &state.pool,
        Some(user_id),
        "user_logout",
        Some("users"),
        None,
    )
    .await;

    Ok(ApiResponse::message("Logged out"))
}

/// Store a one-time reset code and mail it to the account holder. Unknown
/// addresses get the same response as known ones.
pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    if let Some(user) = user {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        state
            .kv
            .set_with_ttl(&reset_store_key(&user.email), &code, RESET_CODE_TTL)
            .await?;

        notify::send_in_background(
            state.mailer.clone(),
            user.email.clone(),
            "Your password reset code".to_string(),
            format!(
                "Hi!\n\nUse the code {code} to reset your password. \
                 It expires in 10 minutes.\n\nThe Shop Team"
            ),
        );
    }

    Ok(ApiResponse::message(
        "If the address is registered, a reset code has been sent",
    ))
}

pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let key = reset_store_key(&payload.email);
    match state.kv.get(&key).await? {
        Some(stored) if stored == payload.code => {}
        _ => return Err(AppError::BadRequest("Invalid or expired code".into())),
    }
    state.kv.del(&key).await?;

    let password_hash = hash_password(&payload.new_password)?;
    let updated = sqlx::query("UPDATE users SET password_hash = $1 WHERE email = $2")
        .bind(password_hash)
        .bind(payload.email.as_str())
        .execute(&state.pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::BadRequest("Invalid or expired code".into()));
    }

    audit::record(
        &state.pool,
        None,
        "password_reset",
        Some("users"),
        Some(serde_json::json!({ "email": payload.email })),
    )
    .await;

    Ok(ApiResponse::message("Password updated"))
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string())
}
