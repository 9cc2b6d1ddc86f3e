use axum::{routing::get, Router};

use crate::state::AppState;

pub mod auth;
pub mod health;
pub mod payments;
pub mod properties;
pub mod tenant;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(auth::router())
        .merge(properties::router())
        .merge(tenants::router())
        .merge(payments::router())
        .merge(tenant::router())
}
