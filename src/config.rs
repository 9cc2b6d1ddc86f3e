use std::env;

const DEV_SESSION_SECRET: &str = "dev-only-session-secret-change-me";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub session_secret: Option<String>,
    pub session_ttl_seconds: i64,
    pub cookie_secure: bool,
    pub card_secret_key: Option<String>,
    pub card_webhook_secret: Option<String>,
    pub card_currency: String,
    pub ach_api_base_url: Option<String>,
    pub ach_client_id: Option<String>,
    pub ach_client_secret: Option<String>,
    pub ach_destination_funding_source: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentdesk API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            session_secret: env_opt("SESSION_SECRET"),
            session_ttl_seconds: env_parse_or("SESSION_TTL_SECONDS", 60 * 60 * 24 * 7),
            cookie_secure: env_parse_bool_or("COOKIE_SECURE", false),
            card_secret_key: env_opt("CARD_SECRET_KEY"),
            card_webhook_secret: env_opt("CARD_WEBHOOK_SECRET"),
            card_currency: env_or("CARD_CURRENCY", "usd").to_ascii_lowercase(),
            ach_api_base_url: env_opt("ACH_API_BASE_URL").map(|url| trim_trailing_slash(&url)),
            ach_client_id: env_opt("ACH_CLIENT_ID"),
            ach_client_secret: env_opt("ACH_CLIENT_SECRET"),
            ach_destination_funding_source: env_opt("ACH_DESTINATION_FUNDING_SOURCE"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Secret used to sign session tokens. Production refuses to fall back
    /// to the development secret.
    pub fn resolved_session_secret(&self) -> Result<String, String> {
        match self.session_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
            _ if self.is_production() => {
                Err("SESSION_SECRET must be set in production.".to_string())
            }
            _ => Ok(DEV_SESSION_SECRET.to_string()),
        }
    }

    pub fn ach_configured(&self) -> bool {
        self.ach_api_base_url.is_some()
            && self.ach_client_id.is_some()
            && self.ach_client_secret.is_some()
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

fn trim_trailing_slash(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        app_name: "Rentdesk API".to_string(),
        environment: "test".to_string(),
        api_prefix: "/v1".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        rate_limit_per_second: 10,
        rate_limit_burst_size: 100,
        database_url: None,
        db_pool_max_connections: 1,
        db_pool_min_connections: 0,
        db_pool_acquire_timeout_seconds: 1,
        db_pool_idle_timeout_seconds: 60,
        session_secret: Some("test-session-secret".to_string()),
        session_ttl_seconds: 3600,
        cookie_secure: false,
        card_secret_key: None,
        card_webhook_secret: Some("whsec_test".to_string()),
        card_currency: "usd".to_string(),
        ach_api_base_url: None,
        ach_client_id: None,
        ach_client_secret: None,
        ach_destination_funding_source: None,
    }
}
