use std::{sync::Arc, time::Duration};

use reqwest::Client;
use sqlx::PgPool;

use crate::{auth::SessionKeys, config::AppConfig, db::build_pool, error::AppError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: Client,
    pub session_keys: Arc<SessionKeys>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let secret = config.resolved_session_secret()?;
        let db_pool = build_pool(&config)?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            session_keys: Arc::new(SessionKeys::new(&secret, config.session_ttl_seconds)),
            config: Arc::new(config),
            db_pool,
            http_client,
        })
    }

    pub fn db_pool(&self) -> Result<&PgPool, AppError> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
        })
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let config = crate::config::test_config();
    AppState {
        session_keys: Arc::new(SessionKeys::new(
            config.session_secret.as_deref().unwrap_or("test-session-secret"),
            config.session_ttl_seconds,
        )),
        config: Arc::new(config),
        db_pool: None,
        http_client: Client::new(),
    }
}
