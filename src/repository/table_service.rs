use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "auto_payments",
    "payment_methods",
    "payments",
    "properties",
    "tenants",
    "users",
];

/// Lists rows as JSON objects. Filter keys are column names compared with
/// `=`; a `<column>__is_null` key with a boolean value tests for NULL.
pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    query
        .push(" ORDER BY t.")
        .push(order_name)
        .push(if ascending { " ASC" } else { " DESC" })
        .push(", t.id ASC");
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_eq(&mut query, id_name, &infer_filter(id_name, &Value::String(row_id.to_string())));
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let columns = sorted_columns(payload)?;

    // jsonb_populate_record lets PostgreSQL coerce uuid, date and numeric
    // columns from the JSON payload using the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push("r.");
            separated.push_unseparated(*column);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let columns = sorted_columns(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for column in &columns {
            separated.push(*column);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*column);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_eq(&mut query, id_name, &infer_filter(id_name, &Value::String(row_id.to_string())));
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_eq(&mut query, id_name, &infer_filter(id_name, &Value::String(row_id.to_string())));
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

/// The `id` of a returned row, or "" when the row has none.
pub fn row_id(row: &Value) -> &str {
    row.get("id").and_then(Value::as_str).unwrap_or_default()
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn sorted_columns(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut columns = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    columns.sort_unstable();
    Ok(columns)
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Internal(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|character| character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_')
        && !trimmed.starts_with(|first: char| first.is_ascii_digit());
    if valid {
        Ok(trimmed)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
}

fn push_filters(
    query: &mut QueryBuilder<Postgres>,
    filters: Option<&Map<String, Value>>,
) -> Result<(), AppError> {
    let Some(filter_map) = filters else {
        return Ok(());
    };

    for (key, value) in filter_map {
        if let Some(column) = key.strip_suffix("__is_null") {
            let column = validate_identifier(column)?;
            let is_null = value.as_bool().unwrap_or(true);
            query
                .push(" AND t.")
                .push(column)
                .push(if is_null { " IS NULL" } else { " IS NOT NULL" });
            continue;
        }

        let column = validate_identifier(key)?;
        if value.is_null() {
            continue;
        }
        query.push(" AND ");
        push_eq(query, column, &infer_filter(column, value));
    }
    Ok(())
}

fn push_eq(query: &mut QueryBuilder<Postgres>, column: &str, value: &Filter) {
    query.push("t.").push(column);
    match value {
        Filter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        Filter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        Filter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
        Filter::I64(number) => {
            query.push(" = ").push_bind(*number);
        }
        Filter::F64(number) => {
            query.push(" = ").push_bind(*number);
        }
        Filter::Date(date) => {
            query.push(" = ").push_bind(*date);
        }
    }
}

fn infer_filter(column: &str, value: &Value) -> Filter {
    match value {
        Value::Bool(flag) => Filter::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(Filter::I64)
            .or_else(|| number.as_f64().map(Filter::F64))
            .unwrap_or_else(|| Filter::Text(number.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if column == "id" || column.ends_with("_id") {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return Filter::Uuid(parsed);
                }
            }
            if column.ends_with("_date") {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return Filter::Date(parsed);
                }
            }
            Filter::Text(text.clone())
        }
        other => Filter::Text(other.to_string()),
    }
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{infer_filter, push_filters, row_id, sorted_columns, validate_table, Filter};

    #[test]
    fn row_id_reads_created_rows() {
        assert_eq!(row_id(&json!({"id": "prop-1", "name": "Elm St"})), "prop-1");
        assert_eq!(row_id(&json!({"name": "no id"})), "");
        assert_eq!(row_id(&json!({"id": 7})), "");
    }

    #[test]
    fn infers_filter_types_from_column_names() {
        assert!(matches!(
            infer_filter("tenant_id", &json!("550e8400-e29b-41d4-a716-446655440000")),
            Filter::Uuid(_)
        ));
        assert_eq!(
            infer_filter("due_date", &json!("2026-11-15")),
            Filter::Date(NaiveDate::from_ymd_opt(2026, 11, 15).expect("date"))
        );
        assert_eq!(
            infer_filter("status", &json!("pending")),
            Filter::Text("pending".to_string())
        );
        assert_eq!(infer_filter("tenant_id", &json!("legacy-7")), Filter::Text("legacy-7".to_string()));
        assert_eq!(infer_filter("active", &json!(true)), Filter::Bool(true));
        assert_eq!(infer_filter("day_of_month", &json!(5)), Filter::I64(5));
    }

    #[test]
    fn filter_sql_supports_equality_and_null_checks() {
        let mut filters = Map::new();
        filters.insert("property_id__is_null".to_string(), Value::Bool(false));
        filters.insert("status".to_string(), json!("pending"));
        filters.insert("tenant_id".to_string(), Value::Null);

        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM payments t WHERE 1=1");
        push_filters(&mut query, Some(&filters)).expect("valid filters");
        let sql = query.sql();
        assert!(sql.contains("t.property_id IS NOT NULL"), "{sql}");
        assert!(sql.contains("t.status::text = $1"), "{sql}");
        assert!(!sql.contains("tenant_id"), "{sql}");
    }

    #[test]
    fn rejects_unknown_tables_and_bad_columns() {
        assert!(validate_table("payments").is_ok());
        assert!(validate_table("pg_shadow").is_err());
        assert!(validate_table("payments; drop").is_err());

        let mut payload = Map::new();
        payload.insert("status\"".to_string(), json!("x"));
        assert!(sorted_columns(&payload).is_err());
    }

    #[test]
    fn columns_are_sorted() {
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!("pending"));
        payload.insert("amount".to_string(), json!(10));
        assert_eq!(sorted_columns(&payload).expect("columns"), vec!["amount", "status"]);
    }
}
