use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    /// Shared signing key for access and refresh tokens. Must be identical
    /// across all running instances, so it is read from configuration and
    /// never generated at startup.
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub gateway: GatewayConfig,
    pub smtp: Option<SmtpConfig>,
    pub recommendation_url: Option<String>,
}

/// Merchant-side settings for the external payment gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_code: String,
    pub hash_secret: String,
    pub return_url: String,
    pub currency: String,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let access_token_ttl_secs = env_i64("ACCESS_TOKEN_TTL_SECS", 3 * 60 * 60);
        let refresh_token_ttl_secs = env_i64("REFRESH_TOKEN_TTL_SECS", 3 * 60 * 60);

        let gateway = GatewayConfig {
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.gateway.example/pay".to_string()),
            merchant_code: env::var("GATEWAY_MERCHANT_CODE")
                .map_err(|_| anyhow::anyhow!("GATEWAY_MERCHANT_CODE is not set"))?,
            hash_secret: env::var("GATEWAY_HASH_SECRET")
                .map_err(|_| anyhow::anyhow!("GATEWAY_HASH_SECRET is not set"))?,
            return_url: env::var("GATEWAY_RETURN_URL")
                .unwrap_or_else(|_| "http://localhost:3000/api/payments/return".to_string()),
            currency: env::var("GATEWAY_CURRENCY").unwrap_or_else(|_| "VND".to_string()),
            locale: env::var("GATEWAY_LOCALE").unwrap_or_else(|_| "vn".to_string()),
        };

        // Mail is optional; without SMTP settings the app runs with dispatch disabled.
        let smtp = match (
            env::var("SMTP_HOST"),
            env::var("SMTP_USERNAME"),
            env::var("SMTP_PASSWORD"),
            env::var("SMTP_FROM"),
        ) {
            (Ok(host), Ok(username), Ok(password), Ok(from_address)) => Some(SmtpConfig {
                host,
                username,
                password,
                from_address,
            }),
            _ => None,
        };

        let recommendation_url = env::var("RECOMMENDATION_URL").ok();

        Ok(Self {
            database_url,
            redis_url,
            host,
            port,
            jwt_secret,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            gateway,
            smtp,
            recommendation_url,
        })
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
