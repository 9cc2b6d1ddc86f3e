use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{
        cleared_session_cookie, require_session, session_cookie, verify_password,
    },
    error::{AppError, AppResult},
    models::{from_row, Role, UserRecord},
    repository::table_service::list_rows,
    schemas::{validate_input, LoginInput},
    state::AppState,
    tenancy::tenant_id_for_user,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/auth/login", axum::routing::post(login))
        .route("/auth/logout", axum::routing::post(logout))
        .route("/auth/session", axum::routing::get(current_session))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let email = payload.email.trim().to_lowercase();

    let mut filters = Map::new();
    filters.insert("email".to_string(), Value::String(email.clone()));
    let user = list_rows(pool, "users", Some(&filters), 1, 0, "created_at", true)
        .await?
        .into_iter()
        .next()
        .map(|row| from_row::<UserRecord>(row, "users"))
        .transpose()?;

    // Same answer for unknown email and wrong password.
    let Some(user) = user.filter(|user| verify_password(&payload.password, &user.password_hash))
    else {
        tracing::info!(email = %email, "Rejected login attempt");
        return Err(AppError::Unauthorized(
            "Invalid email or password.".to_string(),
        ));
    };

    let tenant_id = match user.role {
        Role::Tenant => tenant_id_for_user(pool, &user.id).await?,
        Role::Admin => None,
    };
    let (token, session) = state
        .session_keys
        .issue(&user.id, user.role, tenant_id)?;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "User signed in");

    let cookie = session_cookie(
        &token,
        state.session_keys.ttl_seconds(),
        state.config.cookie_secure,
    );
    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({
            "token": token,
            "session": session,
            "email": user.email,
        })),
    ))
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, cleared_session_cookie(state.config.cookie_secure))],
        Json(json!({ "ok": true })),
    )
}

async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers)?;
    Ok(Json(json!({ "session": session })))
}
