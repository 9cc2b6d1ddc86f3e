use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_tenant,
    error::{AppError, AppResult},
    models::{Payment, PaymentMethodKind, PaymentStatus},
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, ChargePaymentInput,
        CreateAutoPaymentInput, CreatePaymentMethodInput, IdPath, PaymentPath,
        UpdateAutoPaymentInput,
    },
    services::{
        ach::AchClient,
        due_dates::next_due_date,
        fees::calculate_fee,
        ledger::PgLedger,
        payments::{create_payment_intent, PaymentIntentRequest},
        reconciliation::{sync_transfer_status, TransferSyncResult},
    },
    state::AppState,
    tenancy::{current_tenant, owned_auto_payment, owned_payment, owned_payment_method},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/tenant/me", axum::routing::get(tenant_me))
        .route("/tenant/payments", axum::routing::get(tenant_payments))
        .route(
            "/tenant/payments/{payment_id}/card-intent",
            axum::routing::post(create_card_intent),
        )
        .route(
            "/tenant/payments/{payment_id}/ach-transfer",
            axum::routing::post(create_ach_transfer),
        )
        .route(
            "/tenant/payments/{payment_id}/sync-status",
            axum::routing::post(sync_payment_status),
        )
        .route(
            "/tenant/payment-methods",
            axum::routing::get(list_payment_methods).post(create_payment_method),
        )
        .route(
            "/tenant/payment-methods/{id}",
            axum::routing::delete(delete_payment_method),
        )
        .route(
            "/tenant/autopay",
            axum::routing::get(list_auto_payments).post(create_auto_payment),
        )
        .route(
            "/tenant/autopay/{id}",
            axum::routing::patch(update_auto_payment).delete(delete_auto_payment),
        )
}

async fn tenant_me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant = current_tenant(pool, &session).await?;

    let property = match tenant.property_id.as_deref() {
        Some(property_id) => Some(get_row(pool, "properties", property_id, "id").await?),
        None => None,
    };
    let next_due = next_due_date(tenant.payment_due_day, Utc::now().date_naive())?;

    Ok(Json(json!({
        "tenant": tenant,
        "property": property,
        "next_due_date": next_due,
    })))
}

async fn tenant_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant_id = session.tenant_id()?;

    let rows = list_rows(
        pool,
        "payments",
        Some(&tenant_filter(tenant_id)),
        200,
        0,
        "due_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

/// Opens a card or bank-debit charge for amount plus processing fee.
async fn create_card_intent(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    Json(payload): Json<ChargePaymentInput>,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant = current_tenant(pool, &session).await?;

    let payment = owned_payment(pool, &tenant.id, &path.payment_id).await?;
    ensure_chargeable(&payment)?;
    let method = owned_payment_method(pool, &tenant.id, &payload.payment_method_id).await?;
    if method.kind.card_processor_type().is_none() {
        return Err(AppError::BadRequest(
            "Use the ACH transfer endpoint for this payment method.".to_string(),
        ));
    }

    let quote = calculate_fee(payment.amount, method.kind)?;
    let tenant_name = tenant.full_name();
    let intent = create_payment_intent(
        &state.http_client,
        &state.config,
        &PaymentIntentRequest {
            amount_cents: quote.total_cents(),
            payment_id: &payment.id,
            tenant_name: &tenant_name,
            kind: method.kind,
            processor_payment_method: method.processor_reference.as_deref(),
        },
    )
    .await?;

    let intent_id = intent
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Dependency("Card processor returned no intent id.".to_string()))?;

    let patch = card_intent_patch(intent_id, &method.id);
    update_row(pool, "payments", &payment.id, &patch, "id").await?;

    tracing::info!(
        payment_id = %payment.id,
        payment_intent_id = intent_id,
        kind = method.kind.as_str(),
        "Card payment intent created"
    );

    Ok(Json(json!({
        "payment_id": payment.id,
        "payment_intent_id": intent_id,
        "client_secret": intent.get("client_secret").cloned().unwrap_or(Value::Null),
        "fee_quote": quote,
    })))
}

/// Starts an ACH transfer from the tenant's funding source to the
/// landlord's account.
async fn create_ach_transfer(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    Json(payload): Json<ChargePaymentInput>,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant = current_tenant(pool, &session).await?;

    let payment = owned_payment(pool, &tenant.id, &path.payment_id).await?;
    ensure_chargeable(&payment)?;
    let method = owned_payment_method(pool, &tenant.id, &payload.payment_method_id).await?;
    if method.kind != PaymentMethodKind::AlternateAch {
        return Err(AppError::BadRequest(
            "ACH transfers need an alternate_ach payment method.".to_string(),
        ));
    }
    let source = method
        .processor_reference
        .as_deref()
        .filter(|reference| !reference.is_empty())
        .ok_or_else(|| {
            AppError::InvalidState("Payment method has no funding source.".to_string())
        })?;
    let destination = state
        .config
        .ach_destination_funding_source
        .as_deref()
        .ok_or_else(|| {
            AppError::Dependency("ACH_DESTINATION_FUNDING_SOURCE not configured.".to_string())
        })?;

    let client = AchClient::from_config(&state.http_client, &state.config)?;
    let token = client.fetch_access_token().await?;
    let transfer_id = client
        .create_transfer(
            &token,
            source,
            destination,
            payment.amount,
            &state.config.card_currency,
            &payment.id,
        )
        .await?;

    let patch = ach_transfer_patch(&transfer_id, &method.id);
    let updated = update_row(pool, "payments", &payment.id, &patch, "id").await?;

    tracing::info!(payment_id = %payment.id, transfer_id = %transfer_id, "ACH transfer created");
    Ok(Json(json!({
        "transfer_id": transfer_id,
        "payment": updated,
    })))
}

async fn sync_payment_status(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<TransferSyncResult>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant = current_tenant(pool, &session).await?;

    let ledger = PgLedger::new(pool);
    let client = AchClient::from_config(&state.http_client, &state.config)?;
    let result =
        sync_transfer_status(&ledger, &client, &path.payment_id, &tenant.id, Utc::now()).await?;
    Ok(Json(result))
}

async fn list_payment_methods(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;

    let rows = list_rows(
        pool,
        "payment_methods",
        Some(&tenant_filter(session.tenant_id()?)),
        100,
        0,
        "created_at",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_payment_method(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentMethodInput>,
) -> AppResult<impl IntoResponse> {
    let session = require_tenant(&state, &headers)?;
    validate_input(&payload)?;
    let kind: PaymentMethodKind = payload.kind.parse()?;
    let pool = state.db_pool()?;
    let tenant_id = session.tenant_id()?;

    if payload.is_default {
        clear_default_methods(&state, tenant_id).await?;
    }

    let mut record = Map::new();
    record.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    record.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
    if let Some(label) = payload
        .label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
    {
        record.insert("label".to_string(), Value::String(label.to_string()));
    }
    record.insert(
        "processor_reference".to_string(),
        Value::String(payload.processor_reference.trim().to_string()),
    );
    record.insert("is_default".to_string(), Value::Bool(payload.is_default));

    let created = create_row(pool, "payment_methods", &record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_payment_method(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant_id = session.tenant_id()?;
    owned_payment_method(pool, tenant_id, &path.id).await?;

    let mut filters = Map::new();
    filters.insert(
        "payment_method_id".to_string(),
        Value::String(path.id.clone()),
    );
    filters.insert("active".to_string(), Value::Bool(true));
    if count_rows(pool, "auto_payments", Some(&filters)).await? > 0 {
        return Err(AppError::Conflict(
            "Payment method is used by an active autopay.".to_string(),
        ));
    }

    let deleted = delete_row(pool, "payment_methods", &path.id, "id").await?;
    Ok(Json(deleted))
}

async fn list_auto_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;

    let today = Utc::now().date_naive();
    let rows = list_rows(
        pool,
        "auto_payments",
        Some(&tenant_filter(session.tenant_id()?)),
        50,
        0,
        "created_at",
        true,
    )
    .await?
    .into_iter()
    .map(|row| with_next_run_date(row, today))
    .collect::<Vec<_>>();
    Ok(Json(json!({ "data": rows })))
}

async fn create_auto_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAutoPaymentInput>,
) -> AppResult<impl IntoResponse> {
    let session = require_tenant(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let tenant_id = session.tenant_id()?;
    owned_payment_method(pool, tenant_id, &payload.payment_method_id).await?;

    let mut record = Map::new();
    record.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    record.insert(
        "payment_method_id".to_string(),
        Value::String(payload.payment_method_id.clone()),
    );
    record.insert("day_of_month".to_string(), json!(payload.day_of_month));
    record.insert("active".to_string(), Value::Bool(payload.active));

    let created = create_row(pool, "auto_payments", &record).await?;
    tracing::info!(tenant_id, day_of_month = payload.day_of_month, "Autopay configured");
    Ok((
        StatusCode::CREATED,
        Json(with_next_run_date(created, Utc::now().date_naive())),
    ))
}

async fn update_auto_payment(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateAutoPaymentInput>,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let tenant_id = session.tenant_id()?;
    owned_auto_payment(pool, tenant_id, &path.id).await?;
    if let Some(method_id) = payload.payment_method_id.as_deref() {
        owned_payment_method(pool, tenant_id, method_id).await?;
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "auto_payments", &path.id, &patch, "id").await?;
    Ok(Json(with_next_run_date(updated, Utc::now().date_naive())))
}

async fn delete_auto_payment(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_tenant(&state, &headers)?;
    let pool = state.db_pool()?;
    owned_auto_payment(pool, session.tenant_id()?, &path.id).await?;

    let deleted = delete_row(pool, "auto_payments", &path.id, "id").await?;
    Ok(Json(deleted))
}

fn ensure_chargeable(payment: &Payment) -> AppResult<()> {
    match payment.status {
        PaymentStatus::Pending | PaymentStatus::Failed => Ok(()),
        status => Err(AppError::InvalidState(format!(
            "Payment is already {status}."
        ))),
    }
}

/// Moves a payment to processing under a new card intent. Any earlier
/// transfer reference is cleared so a stale transfer can't be synced onto it.
fn card_intent_patch(intent_id: &str, method_id: &str) -> Map<String, Value> {
    let mut patch = processing_patch(method_id);
    patch.insert(
        "payment_intent_id".to_string(),
        Value::String(intent_id.to_string()),
    );
    patch.insert("transfer_id".to_string(), Value::Null);
    patch
}

fn ach_transfer_patch(transfer_id: &str, method_id: &str) -> Map<String, Value> {
    let mut patch = processing_patch(method_id);
    patch.insert(
        "transfer_id".to_string(),
        Value::String(transfer_id.to_string()),
    );
    patch.insert("payment_intent_id".to_string(), Value::Null);
    patch
}

fn processing_patch(method_id: &str) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        "payment_method_id".to_string(),
        Value::String(method_id.to_string()),
    );
    patch.insert(
        "status".to_string(),
        Value::String(PaymentStatus::Processing.as_str().to_string()),
    );
    patch.insert("paid_at".to_string(), Value::Null);
    patch
}

async fn clear_default_methods(state: &AppState, tenant_id: &str) -> AppResult<()> {
    let pool = state.db_pool()?;
    let mut filters = tenant_filter(tenant_id);
    filters.insert("is_default".to_string(), Value::Bool(true));
    let defaults = list_rows(pool, "payment_methods", Some(&filters), 100, 0, "created_at", true)
        .await?;

    let mut patch = Map::new();
    patch.insert("is_default".to_string(), Value::Bool(false));
    for row in defaults {
        if let Some(id) = row.get("id").and_then(Value::as_str) {
            update_row(pool, "payment_methods", id, &patch, "id").await?;
        }
    }
    Ok(())
}

fn tenant_filter(tenant_id: &str) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    filters
}

/// Adds `next_run_date` to an autopay row; inactive rows get null.
fn with_next_run_date(mut row: Value, today: NaiveDate) -> Value {
    let active = row.get("active").and_then(Value::as_bool).unwrap_or(false);
    let next_run = row
        .get("day_of_month")
        .and_then(Value::as_u64)
        .and_then(|day| u32::try_from(day).ok())
        .filter(|_| active)
        .and_then(|day| next_due_date(day, today).ok());
    if let Some(obj) = row.as_object_mut() {
        obj.insert("next_run_date".to_string(), json!(next_run));
    }
    row
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use chrono::NaiveDate;
    use serde_json::json;
    use tower::ServiceExt;

    use super::{
        ach_transfer_patch, card_intent_patch, ensure_chargeable, router, with_next_run_date,
    };
    use crate::{
        error::AppError,
        models::{Payment, PaymentStatus, Role},
        state::test_state,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn next_run_date_follows_due_day_rules() {
        let row = with_next_run_date(
            json!({"id": "ap-1", "day_of_month": 31, "active": true}),
            date(2027, 2, 10),
        );
        assert_eq!(row["next_run_date"], "2027-02-28");

        let paused = with_next_run_date(
            json!({"id": "ap-2", "day_of_month": 5, "active": false}),
            date(2027, 2, 10),
        );
        assert!(paused["next_run_date"].is_null());
    }

    #[test]
    fn only_open_payments_are_chargeable() {
        let mut payment = Payment {
            id: "pay-1".to_string(),
            tenant_id: "ten-1".to_string(),
            property_id: "prop-1".to_string(),
            amount: 900.0,
            status: PaymentStatus::Pending,
            transfer_id: None,
            payment_intent_id: None,
            payment_method_id: None,
            due_date: date(2026, 11, 1),
            paid_at: None,
        };
        assert!(ensure_chargeable(&payment).is_ok());

        payment.status = PaymentStatus::Failed;
        assert!(ensure_chargeable(&payment).is_ok());

        payment.status = PaymentStatus::Succeeded;
        assert!(matches!(
            ensure_chargeable(&payment),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn new_card_intent_drops_the_old_transfer() {
        let patch = card_intent_patch("pi_2", "pm-card");
        assert_eq!(patch["payment_intent_id"], "pi_2");
        assert!(patch["transfer_id"].is_null());
        assert_eq!(patch["payment_method_id"], "pm-card");
        assert_eq!(patch["status"], "processing");
    }

    #[test]
    fn new_ach_transfer_drops_the_old_intent() {
        let patch = ach_transfer_patch("tr-2", "pm-bank");
        assert_eq!(patch["transfer_id"], "tr-2");
        assert!(patch["payment_intent_id"].is_null());
        assert_eq!(patch["payment_method_id"], "pm-bank");
        assert_eq!(patch["status"], "processing");
        assert!(patch["paid_at"].is_null());
    }

    #[tokio::test]
    async fn admin_sessions_cannot_use_the_portal() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("admin-1", Role::Admin, None)
            .expect("issue");
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::post("/tenant/payments/pay-1/sync-status")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unsigned_requests_are_rejected() {
        let app = router().with_state(test_state());
        let response = app
            .oneshot(Request::get("/tenant/me").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
