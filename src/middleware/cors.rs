use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use tower_http::cors::{Any, CorsLayer};

use super::request_id::REQUEST_ID_HEADER;
use crate::config::AppConfig;

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let headers = [
        ACCEPT,
        AUTHORIZATION,
        CONTENT_TYPE,
        REQUEST_ID_HEADER,
    ];

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(headers);

    // Session cookies need credentialed CORS, which rules out a wildcard origin.
    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any).allow_credentials(false);
    }

    let origins = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect::<Vec<_>>();
    layer.allow_origin(origins).allow_credentials(true)
}
