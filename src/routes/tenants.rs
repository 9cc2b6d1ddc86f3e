use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{hash_password, require_admin},
    error::{AppError, AppResult},
    models::Role,
    repository::table_service::{create_row, delete_row, get_row, list_rows, row_id, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateTenantInput,
        IdPath, TenantsQuery, UpdateTenantInput,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants",
            axum::routing::get(list_tenants).post(create_tenant),
        )
        .route(
            "/tenants/{id}",
            axum::routing::get(get_tenant)
                .patch(update_tenant)
                .delete(delete_tenant),
        )
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty(query.property_id.as_deref()) {
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }
    let rows = list_rows(
        pool,
        "tenants",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "last_name",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

/// Creates the tenant's login and profile. The user row is removed again if
/// the profile insert fails.
async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTenantInput>,
) -> AppResult<impl IntoResponse> {
    let session = require_admin(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let property_id = non_empty(payload.property_id.as_deref()).map(ToOwned::to_owned);
    if let Some(property_id) = &property_id {
        ensure_property_exists(&state, property_id).await?;
    }

    let email = payload.email.trim().to_lowercase();
    let mut user = Map::new();
    user.insert("email".to_string(), Value::String(email.clone()));
    user.insert(
        "password_hash".to_string(),
        Value::String(hash_password(&payload.password)?),
    );
    user.insert(
        "role".to_string(),
        Value::String(Role::Tenant.as_str().to_string()),
    );
    let user_row = create_row(pool, "users", &user).await?;
    let user_id = user_row
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal("Created user has no id.".to_string()))?;

    let mut tenant = Map::new();
    tenant.insert("user_id".to_string(), Value::String(user_id.clone()));
    tenant.insert("email".to_string(), Value::String(email));
    tenant.insert(
        "first_name".to_string(),
        Value::String(payload.first_name.trim().to_string()),
    );
    tenant.insert(
        "last_name".to_string(),
        Value::String(payload.last_name.trim().to_string()),
    );
    if let Some(phone) = non_empty(payload.phone.as_deref()) {
        tenant.insert("phone".to_string(), Value::String(phone.to_string()));
    }
    if let Some(property_id) = property_id {
        tenant.insert("property_id".to_string(), Value::String(property_id));
    }
    tenant.insert(
        "payment_due_day".to_string(),
        json!(payload.payment_due_day),
    );

    let created = match create_row(pool, "tenants", &tenant).await {
        Ok(created) => created,
        Err(error) => {
            if let Err(cleanup) = delete_row(pool, "users", &user_id, "id").await {
                tracing::error!(user_id = %user_id, error = %cleanup, "Could not remove orphaned user");
            }
            return Err(error);
        }
    };

    tracing::info!(
        admin_id = %session.user_id(),
        tenant_id = row_id(&created),
        "Tenant created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let pool = state.db_pool()?;
    let tenant = get_row(pool, "tenants", &path.id, "id").await?;
    Ok(Json(tenant))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTenantInput>,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    if let Some(property_id) = non_empty(payload.property_id.as_deref()) {
        ensure_property_exists(&state, property_id).await?;
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "tenants", &path.id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_tenant(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let deleted = delete_row(pool, "tenants", &path.id, "id").await?;
    if let Some(user_id) = deleted.get("user_id").and_then(Value::as_str) {
        delete_row(pool, "users", user_id, "id").await?;
    }

    tracing::info!(admin_id = %session.user_id(), tenant_id = %path.id, "Tenant deleted");
    Ok(Json(deleted))
}

async fn ensure_property_exists(state: &AppState, property_id: &str) -> AppResult<()> {
    let pool = state.db_pool()?;
    get_row(pool, "properties", property_id, "id")
        .await
        .map(|_| ())
        .map_err(|error| match error {
            AppError::NotFound(_) => {
                AppError::BadRequest(format!("Property {property_id} does not exist."))
            }
            other => other,
        })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
