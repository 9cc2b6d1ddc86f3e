//! Typed views of the rows the repository hands back as JSON.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Tenant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Tenant => "tenant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    Card,
    BankDebit,
    AlternateAch,
}

impl PaymentMethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankDebit => "bank_debit",
            Self::AlternateAch => "alternate_ach",
        }
    }

    /// Payment method type understood by the card processor.
    pub fn card_processor_type(self) -> Option<&'static str> {
        match self {
            Self::Card => Some("card"),
            Self::BankDebit => Some("us_bank_account"),
            Self::AlternateAch => None,
        }
    }
}

impl FromStr for PaymentMethodKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "card" => Ok(Self::Card),
            "bank_debit" | "us_bank_account" => Ok(Self::BankDebit),
            "alternate_ach" | "ach" => Ok(Self::AlternateAch),
            other => Err(AppError::BadRequest(format!(
                "Unrecognized payment method kind '{other}'."
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub rent_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    pub payment_due_day: u32,
}

impl Tenant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub tenant_id: String,
    pub property_id: String,
    pub amount: f64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transfer_id: Option<String>,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPayment {
    pub tenant_id: String,
    pub property_id: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub tenant_id: String,
    pub kind: PaymentMethodKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub processor_reference: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPayment {
    pub id: String,
    pub tenant_id: String,
    pub payment_method_id: String,
    pub day_of_month: u32,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Decodes a `row_to_json` row into a typed record.
pub fn from_row<T: serde::de::DeserializeOwned>(row: Value, table: &str) -> Result<T, AppError> {
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, error = %error, "Row did not match the expected shape");
        AppError::Internal(format!("Malformed {table} record."))
    })
}
