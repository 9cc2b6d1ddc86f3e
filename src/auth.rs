use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::Role,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "session";

/// Signed session carried by every authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub sub: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub exp: i64,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    pub fn tenant_id(&self) -> AppResult<&str> {
        self.tenant_id
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Forbidden("Tenant profile required.".to_string()))
    }
}

pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds: ttl_seconds.max(60),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    pub fn issue(
        &self,
        user_id: &str,
        role: Role,
        tenant_id: Option<String>,
    ) -> AppResult<(String, Session)> {
        let session = Session {
            sub: user_id.to_string(),
            role,
            tenant_id,
            exp: Utc::now().timestamp() + self.ttl_seconds,
        };
        let token = encode(&Header::default(), &session, &self.encoding)
            .map_err(|error| AppError::Internal(format!("Could not sign session: {error}")))?;
        Ok((token, session))
    }

    pub fn verify(&self, token: &str) -> AppResult<Session> {
        decode::<Session>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|error| {
                tracing::debug!(error = %error, "Rejected session token");
                AppError::Unauthorized("Unauthorized: invalid or expired session.".to_string())
            })
    }
}

pub fn require_session(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let token = session_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing session.".to_string())
    })?;
    state.session_keys.verify(&token)
}

pub fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let session = require_session(state, headers)?;
    if session.role != Role::Admin {
        return Err(AppError::Forbidden(
            "Unauthorized: admin access required.".to_string(),
        ));
    }
    Ok(session)
}

pub fn require_tenant(state: &AppState, headers: &HeaderMap) -> AppResult<Session> {
    let session = require_session(state, headers)?;
    if session.role != Role::Tenant {
        return Err(AppError::Forbidden(
            "Unauthorized: tenant access required.".to_string(),
        ));
    }
    session.tenant_id()?;
    Ok(session)
}

/// Bearer header wins over the cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(bearer.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn cleared_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AppError::Internal(format!("Could not hash password: {error}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, header::COOKIE, HeaderMap, HeaderValue};

    use super::{
        hash_password, require_admin, require_tenant, session_cookie, verify_password,
        SessionKeys,
    };
    use crate::{error::AppError, models::Role, state::test_state};

    fn headers_with_cookie(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; session={token}")).expect("header"),
        );
        headers
    }

    #[test]
    fn issued_sessions_verify_and_foreign_ones_do_not() {
        let keys = SessionKeys::new("secret-a", 3600);
        let (token, session) = keys
            .issue("user-1", Role::Tenant, Some("ten-1".to_string()))
            .expect("issue");
        assert_eq!(keys.verify(&token).expect("verify"), session);

        let other = SessionKeys::new("secret-b", 3600);
        assert!(matches!(
            other.verify(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn reads_session_from_cookie_or_bearer() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("admin-1", Role::Admin, None)
            .expect("issue");

        assert!(require_admin(&state, &headers_with_cookie(&token)).is_ok());

        let mut bearer = HeaderMap::new();
        bearer.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        assert!(require_admin(&state, &bearer).is_ok());
    }

    #[test]
    fn rejects_wrong_role_and_missing_session() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("admin-1", Role::Admin, None)
            .expect("issue");

        assert!(matches!(
            require_tenant(&state, &headers_with_cookie(&token)),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            require_admin(&state, &HeaderMap::new()),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn tenant_session_without_profile_is_rejected() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("user-2", Role::Tenant, None)
            .expect("issue");
        assert!(require_tenant(&state, &headers_with_cookie(&token)).is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn cookie_flags() {
        let cookie = session_cookie("abc", 60, true);
        assert!(cookie.starts_with("session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("; Secure"));
    }
}
