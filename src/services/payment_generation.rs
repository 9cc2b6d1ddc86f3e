use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    models::{NewPayment, PaymentStatus, Tenant},
    services::{due_dates::next_due_date, ledger::PaymentLedger},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    Generated,
    Existing,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantGenerationResult {
    pub tenant_id: String,
    pub tenant_name: String,
    pub due_date: Option<NaiveDate>,
    pub outcome: GenerationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one missing-payment run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub tenants_checked: u32,
    pub payments_generated: u32,
    pub payments_existing: u32,
    pub errors: u32,
    pub results: Vec<TenantGenerationResult>,
}

/// Creates the current cycle's pending payment for every assigned tenant
/// that does not have one yet.
///
/// Tenants are handled one at a time; a failure is recorded against that
/// tenant and the run carries on with the next one.
pub async fn generate_missing_payments(
    ledger: &dyn PaymentLedger,
    today: NaiveDate,
) -> AppResult<GenerationSummary> {
    let tenants = ledger.list_billable_tenants().await?;
    let mut summary = GenerationSummary::default();

    for row in tenants {
        summary.tenants_checked += 1;

        let tenant = match row {
            Ok(tenant) => tenant,
            Err(unreadable) => {
                summary.errors += 1;
                summary.results.push(TenantGenerationResult {
                    tenant_id: unreadable.tenant_id,
                    tenant_name: String::new(),
                    due_date: None,
                    outcome: GenerationOutcome::Error,
                    payment_id: None,
                    error: Some(unreadable.error),
                });
                continue;
            }
        };

        let result = match ensure_cycle_payment(ledger, &tenant, today).await {
            Ok((due_date, outcome, payment_id)) => {
                match outcome {
                    GenerationOutcome::Generated => summary.payments_generated += 1,
                    _ => summary.payments_existing += 1,
                }
                TenantGenerationResult {
                    tenant_id: tenant.id.clone(),
                    tenant_name: tenant.full_name(),
                    due_date: Some(due_date),
                    outcome,
                    payment_id: Some(payment_id),
                    error: None,
                }
            }
            Err(error) => {
                warn!(tenant_id = %tenant.id, error = %error, "Could not generate payment for tenant");
                summary.errors += 1;
                TenantGenerationResult {
                    tenant_id: tenant.id.clone(),
                    tenant_name: tenant.full_name(),
                    due_date: next_due_date(tenant.payment_due_day, today).ok(),
                    outcome: GenerationOutcome::Error,
                    payment_id: None,
                    error: Some(error.to_string()),
                }
            }
        };
        summary.results.push(result);
    }

    info!(
        checked = summary.tenants_checked,
        generated = summary.payments_generated,
        existing = summary.payments_existing,
        errors = summary.errors,
        "Missing payment generation completed"
    );

    Ok(summary)
}

async fn ensure_cycle_payment(
    ledger: &dyn PaymentLedger,
    tenant: &Tenant,
    today: NaiveDate,
) -> AppResult<(NaiveDate, GenerationOutcome, String)> {
    let due_date = next_due_date(tenant.payment_due_day, today)?;

    if let Some(existing) = ledger.find_payment_for_cycle(&tenant.id, due_date).await? {
        return Ok((due_date, GenerationOutcome::Existing, existing.id));
    }

    let property_id = tenant
        .property_id
        .as_deref()
        .ok_or_else(|| AppError::InvalidState("Tenant has no property.".to_string()))?;
    let property = ledger
        .get_property(property_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Property {property_id} not found.")))?;

    let created = ledger
        .create_payment(NewPayment {
            tenant_id: tenant.id.clone(),
            property_id: property.id,
            amount: property.rent_amount,
            status: PaymentStatus::Pending,
            due_date,
        })
        .await?;

    Ok((due_date, GenerationOutcome::Generated, created.id))
}
