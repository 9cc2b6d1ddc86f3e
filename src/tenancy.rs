use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::{
    auth::Session,
    error::{AppError, AppResult},
    models::{from_row, AutoPayment, Payment, PaymentMethod, Tenant},
    repository::table_service::{get_row, list_rows},
};

/// Tenant row behind a tenant session.
pub async fn current_tenant(pool: &PgPool, session: &Session) -> AppResult<Tenant> {
    let tenant_id = session.tenant_id()?;
    let row = get_row(pool, "tenants", tenant_id, "id")
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => {
                AppError::Unauthorized("Unauthorized: tenant profile no longer exists.".to_string())
            }
            other => other,
        })?;
    let tenant: Tenant = from_row(row, "tenants")?;
    if tenant.user_id != session.user_id() {
        return Err(AppError::Unauthorized(
            "Unauthorized: session does not match tenant.".to_string(),
        ));
    }
    Ok(tenant)
}

/// Resolves the tenant id for a freshly authenticated tenant user.
pub async fn tenant_id_for_user(pool: &PgPool, user_id: &str) -> AppResult<Option<String>> {
    let mut filters = Map::new();
    filters.insert("user_id".to_string(), Value::String(user_id.to_string()));
    let rows = list_rows(pool, "tenants", Some(&filters), 1, 0, "created_at", true).await?;
    Ok(rows
        .first()
        .and_then(|row| row.get("id"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned))
}

/// Payment owned by the tenant; anything else reads as not found.
pub async fn owned_payment(pool: &PgPool, tenant_id: &str, payment_id: &str) -> AppResult<Payment> {
    let row = get_row(pool, "payments", payment_id, "id").await?;
    let payment: Payment = from_row(row, "payments")?;
    if payment.tenant_id != tenant_id {
        return Err(AppError::NotFound("payments record not found.".to_string()));
    }
    Ok(payment)
}

pub async fn owned_payment_method(
    pool: &PgPool,
    tenant_id: &str,
    method_id: &str,
) -> AppResult<PaymentMethod> {
    let row = get_row(pool, "payment_methods", method_id, "id").await?;
    let method: PaymentMethod = from_row(row, "payment_methods")?;
    if method.tenant_id != tenant_id {
        return Err(AppError::NotFound(
            "payment_methods record not found.".to_string(),
        ));
    }
    Ok(method)
}

pub async fn owned_auto_payment(
    pool: &PgPool,
    tenant_id: &str,
    auto_payment_id: &str,
) -> AppResult<AutoPayment> {
    let row = get_row(pool, "auto_payments", auto_payment_id, "id").await?;
    let auto_payment: AutoPayment = from_row(row, "auto_payments")?;
    if auto_payment.tenant_id != tenant_id {
        return Err(AppError::NotFound(
            "auto_payments record not found.".to_string(),
        ));
    }
    Ok(auto_payment)
}
