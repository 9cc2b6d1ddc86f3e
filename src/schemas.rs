use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

fn default_limit_200() -> i64 {
    200
}
fn default_false() -> bool {
    false
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 512))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeQuoteInput {
    pub amount: f64,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    pub rent_amount: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(range(exclusive_min = 0.0))]
    pub rent_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTenantInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 512))]
    pub password: String,
    #[validate(length(min = 1, max = 120))]
    pub first_name: String,
    #[validate(length(min = 1, max = 120))]
    pub last_name: String,
    pub phone: Option<String>,
    pub property_id: Option<String>,
    #[validate(range(min = 1, max = 31))]
    pub payment_due_day: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateTenantInput {
    #[validate(length(min = 1, max = 120))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub property_id: Option<String>,
    #[validate(range(min = 1, max = 31))]
    pub payment_due_day: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesQuery {
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantsQuery {
    pub property_id: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsQuery {
    pub status: Option<String>,
    pub tenant_id: Option<String>,
    pub property_id: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentMethodInput {
    pub kind: String,
    #[validate(length(max = 120))]
    pub label: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub processor_reference: String,
    #[serde(default = "default_false")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAutoPaymentInput {
    pub payment_method_id: String,
    #[validate(range(min = 1, max = 31))]
    pub day_of_month: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateAutoPaymentInput {
    pub payment_method_id: Option<String>,
    #[validate(range(min = 1, max = 31))]
    pub day_of_month: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargePaymentInput {
    pub payment_method_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdPath {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPath {
    pub payment_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        remove_nulls, serialize_to_map, validate_input, CreatePropertyInput, CreateTenantInput,
        UpdatePropertyInput,
    };

    #[test]
    fn rejects_non_positive_rent() {
        let input = CreatePropertyInput {
            name: "Maple Court".to_string(),
            address: None,
            rent_amount: 0.0,
        };
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn rejects_due_day_out_of_range() {
        let input: CreateTenantInput = serde_json::from_value(json!({
            "email": "ada@example.com",
            "password": "long-enough",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "payment_due_day": 32
        }))
        .expect("shape");
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn patch_maps_drop_absent_fields() {
        let patch = UpdatePropertyInput {
            name: None,
            address: Some("12 Elm St".to_string()),
            rent_amount: Some(1500.0),
        };
        assert!(validate_input(&patch).is_ok());
        let map = remove_nulls(serialize_to_map(&patch));
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("name"));
    }
}
