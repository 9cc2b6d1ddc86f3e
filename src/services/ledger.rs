use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{from_row, NewPayment, Payment, PaymentStatus, Property, Tenant},
    repository::table_service::{create_row, get_row, list_rows, update_row},
};

const TENANT_PAGE_SIZE: i64 = 500;

/// A tenant row that could not be read as a [`Tenant`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableTenant {
    pub tenant_id: String,
    pub error: String,
}

pub type TenantRow = Result<Tenant, UnreadableTenant>;

/// Persistence the reconciler and the payment generator depend on.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn get_payment(&self, payment_id: &str) -> AppResult<Option<Payment>>;

    /// Writes status and paid-at together in a single statement.
    async fn set_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    /// Tenants with a property assignment, oldest first. Rows that do not
    /// decode are returned as [`UnreadableTenant`] instead of failing the list.
    async fn list_billable_tenants(&self) -> AppResult<Vec<TenantRow>>;

    async fn get_property(&self, property_id: &str) -> AppResult<Option<Property>>;

    async fn find_payment_for_cycle(
        &self,
        tenant_id: &str,
        due_date: NaiveDate,
    ) -> AppResult<Option<Payment>>;

    async fn create_payment(&self, payment: NewPayment) -> AppResult<Payment>;
}

pub struct PgLedger<'a> {
    pool: &'a PgPool,
}

impl<'a> PgLedger<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLedger for PgLedger<'_> {
    async fn get_payment(&self, payment_id: &str) -> AppResult<Option<Payment>> {
        match get_row(self.pool, "payments", payment_id, "id").await {
            Ok(row) => from_row(row, "payments").map(Some),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn set_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut patch = Map::new();
        patch.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        patch.insert(
            "paid_at".to_string(),
            paid_at
                .map(|at| Value::String(at.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        update_row(self.pool, "payments", payment_id, &patch, "id").await?;
        Ok(())
    }

    async fn list_billable_tenants(&self) -> AppResult<Vec<TenantRow>> {
        let mut filters = Map::new();
        filters.insert("property_id__is_null".to_string(), Value::Bool(false));

        let mut tenants = Vec::new();
        let mut offset = 0;
        loop {
            let rows = list_rows(
                self.pool,
                "tenants",
                Some(&filters),
                TENANT_PAGE_SIZE,
                offset,
                "created_at",
                true,
            )
            .await?;
            let fetched = rows.len() as i64;
            tenants.extend(rows.into_iter().map(decode_tenant_row));
            if fetched < TENANT_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(tenants)
    }

    async fn get_property(&self, property_id: &str) -> AppResult<Option<Property>> {
        match get_row(self.pool, "properties", property_id, "id").await {
            Ok(row) => from_row(row, "properties").map(Some),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn find_payment_for_cycle(
        &self,
        tenant_id: &str,
        due_date: NaiveDate,
    ) -> AppResult<Option<Payment>> {
        let mut filters = Map::new();
        filters.insert(
            "tenant_id".to_string(),
            Value::String(tenant_id.to_string()),
        );
        filters.insert(
            "due_date".to_string(),
            Value::String(due_date.to_string()),
        );
        let rows = list_rows(self.pool, "payments", Some(&filters), 1, 0, "created_at", true).await?;
        rows.into_iter()
            .next()
            .map(|row| from_row(row, "payments"))
            .transpose()
    }

    async fn create_payment(&self, payment: NewPayment) -> AppResult<Payment> {
        let record = match serde_json::to_value(&payment) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(AppError::Internal(
                    "Could not serialize payment.".to_string(),
                ))
            }
        };
        let created = create_row(self.pool, "payments", &record).await?;
        from_row(created, "payments")
    }
}

fn decode_tenant_row(row: Value) -> TenantRow {
    let tenant_id = row
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    serde_json::from_value::<Tenant>(row).map_err(|error| {
        tracing::warn!(tenant_id = %tenant_id, error = %error, "Skipping unreadable tenant row");
        UnreadableTenant {
            tenant_id,
            error: format!("Tenant record is malformed: {error}"),
        }
    })
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::decode_tenant_row;

    #[test]
    fn malformed_tenant_rows_keep_their_id() {
        let negative_day = decode_tenant_row(json!({
            "id": "ten-9",
            "user_id": "user-9",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "property_id": "prop-1",
            "payment_due_day": -3
        }));
        let unreadable = negative_day.expect_err("negative due day");
        assert_eq!(unreadable.tenant_id, "ten-9");
        assert!(unreadable.error.contains("malformed"));

        let missing_name = decode_tenant_row(json!({
            "id": "ten-10",
            "user_id": "user-10",
            "first_name": null,
            "last_name": "Hopper",
            "property_id": "prop-1",
            "payment_due_day": 5
        }));
        assert_eq!(
            missing_name.err().map(|row| row.tenant_id).as_deref(),
            Some("ten-10")
        );
    }

    #[test]
    fn well_formed_tenant_rows_decode() {
        let tenant = decode_tenant_row(json!({
            "id": "ten-1",
            "user_id": "user-1",
            "first_name": "Grace",
            "last_name": "Hopper",
            "email": "grace@example.com",
            "phone": null,
            "property_id": "prop-1",
            "payment_due_day": 15,
            "created_at": "2026-10-01T00:00:00+00:00"
        }))
        .expect("valid row");
        assert_eq!(tenant.payment_due_day, 15);
    }
}
