use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_admin,
    error::{AppError, AppResult},
    repository::table_service::{
        count_rows, create_row, delete_row, get_row, list_rows, row_id, update_row,
    },
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreatePropertyInput,
        IdPath, PropertiesQuery, UpdatePropertyInput,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{id}",
            axum::routing::get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let rows = list_rows(
        pool,
        "properties",
        None,
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "name",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let session = require_admin(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "name".to_string(),
        Value::String(payload.name.trim().to_string()),
    );
    let created = create_row(pool, "properties", &record).await?;

    tracing::info!(
        user_id = %session.user_id(),
        property_id = row_id(&created),
        "Property created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let mut property = get_row(pool, "properties", &path.id, "id").await?;

    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(path.id.clone()));
    let tenant_count = count_rows(pool, "tenants", Some(&filters)).await?;
    if let Some(obj) = property.as_object_mut() {
        obj.insert("tenant_count".to_string(), json!(tenant_count));
    }
    Ok(Json(property))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers)?;
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "properties", &path.id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn delete_property(
    State(state): State<AppState>,
    Path(path): Path<IdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let session = require_admin(&state, &headers)?;
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    filters.insert("property_id".to_string(), Value::String(path.id.clone()));
    if count_rows(pool, "tenants", Some(&filters)).await? > 0 {
        return Err(AppError::Conflict(
            "Property still has tenants assigned.".to_string(),
        ));
    }

    let deleted = delete_row(pool, "properties", &path.id, "id").await?;
    tracing::info!(user_id = %session.user_id(), property_id = %path.id, "Property deleted");
    Ok(Json(deleted))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::router;
    use crate::{models::Role, state::test_state};

    #[tokio::test]
    async fn tenants_cannot_manage_properties() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("user-1", Role::Tenant, Some("ten-1".to_string()))
            .expect("issue");
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::get("/properties")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_the_database() {
        let state = test_state();
        let (token, _) = state
            .session_keys
            .issue("admin-1", Role::Admin, None)
            .expect("issue");
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::post("/properties")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"Maple Court","rent_amount":-5}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
