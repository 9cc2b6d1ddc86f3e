use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_admin, require_session},
    error::{AppError, AppResult},
    models::PaymentMethodKind,
    repository::table_service::list_rows,
    schemas::{clamp_limit_in_range, FeeQuoteInput, PaymentsQuery},
    services::{
        ach::AchClient,
        fees::{calculate_fee, FeeQuote},
        ledger::PgLedger,
        payment_generation::{generate_missing_payments, GenerationSummary},
        payments::{apply_card_event, verify_webhook_signature, CardEvent},
    },
    state::AppState,
};

const WEBHOOK_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payments", axum::routing::get(list_payments))
        .route(
            "/payments/generate-missing",
            axum::routing::post(generate_missing),
        )
        .route("/payments/fee-quote", axum::routing::post(fee_quote))
        .route(
            "/processor/capabilities",
            axum::routing::get(processor_capabilities),
        )
        .route("/webhooks/card", axum::routing::post(card_webhook))
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    for (column, value) in [
        ("status", query.status.as_deref()),
        ("tenant_id", query.tenant_id.as_deref()),
        ("property_id", query.property_id.as_deref()),
    ] {
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            filters.insert(column.to_string(), Value::String(value.to_string()));
        }
    }

    let rows = list_rows(
        pool,
        "payments",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        query.offset,
        "due_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn generate_missing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<GenerationSummary>> {
    let session = require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    tracing::info!(admin_id = %session.user_id(), "Generating missing payments");
    let ledger = PgLedger::new(pool);
    let summary = generate_missing_payments(&ledger, Utc::now().date_naive()).await?;
    Ok(Json(summary))
}

async fn fee_quote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FeeQuoteInput>,
) -> AppResult<Json<FeeQuote>> {
    require_session(&state, &headers)?;
    let kind: PaymentMethodKind = payload.kind.parse()?;
    Ok(Json(calculate_fee(payload.amount, kind)?))
}

/// Token exchange, then the capability lookup with that token.
async fn processor_capabilities(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let client = AchClient::from_config(&state.http_client, &state.config)?;

    let token = client.fetch_access_token().await?;
    let capabilities = client.get_account_capabilities(&token).await?;
    Ok(Json(json!({ "data": capabilities })))
}

async fn card_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<Value>> {
    let secret = state
        .config
        .card_webhook_secret
        .as_deref()
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| AppError::Dependency("CARD_WEBHOOK_SECRET not configured.".to_string()))?;

    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing webhook signature.".to_string()))?;
    if !verify_webhook_signature(&body, signature, secret, Utc::now().timestamp()) {
        tracing::warn!("Rejected card webhook with invalid signature");
        return Err(AppError::BadRequest(
            "Invalid webhook signature.".to_string(),
        ));
    }

    let event: Value = serde_json::from_str(&body)
        .map_err(|error| AppError::BadRequest(format!("Invalid webhook payload: {error}")))?;
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Some(card_event) = CardEvent::from_event_type(event_type) else {
        tracing::debug!(event_type, "Ignoring card webhook event");
        return Ok(Json(json!({ "received": true, "handled": false })));
    };

    let payment_id = event
        .pointer("/data/object/metadata/payment_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("Webhook event has no payment reference.".to_string())
        })?;

    let ledger = PgLedger::new(state.db_pool()?);
    let outcome = apply_card_event(&ledger, payment_id, card_event, Utc::now()).await?;
    Ok(Json(json!({
        "received": true,
        "handled": true,
        "outcome": outcome,
    })))
}
