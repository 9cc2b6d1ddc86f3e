use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    models::PaymentStatus,
    services::{
        ach::{TransferStatus, TransferStatusSource},
        ledger::PaymentLedger,
    },
};

/// Outcome of syncing one payment with its ACH transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSyncResult {
    pub payment_id: String,
    pub transfer_id: String,
    pub processor_status: TransferStatus,
    pub previous_status: PaymentStatus,
    pub status: PaymentStatus,
    pub updated: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub processor: Value,
}

/// Pulls the processor's status for the payment's transfer and writes it
/// back when it differs from what is stored. A succeeded payment is final
/// and is never rewritten.
///
/// The read and the write are separate statements, so a concurrent writer
/// that lands between them is overwritten. At most one write per call.
pub async fn sync_transfer_status(
    ledger: &dyn PaymentLedger,
    processor: &dyn TransferStatusSource,
    payment_id: &str,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> AppResult<TransferSyncResult> {
    let payment = ledger
        .get_payment(payment_id)
        .await?
        .filter(|payment| payment.tenant_id == tenant_id)
        .ok_or_else(|| AppError::NotFound("Payment not found.".to_string()))?;

    let transfer_id = payment
        .transfer_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            AppError::InvalidState("Payment has no ACH transfer to sync.".to_string())
        })?;

    let snapshot = processor.transfer_status(&transfer_id).await?;
    let resolved = snapshot.status.to_payment_status();

    if resolved == payment.status || payment.status == PaymentStatus::Succeeded {
        if resolved != payment.status {
            warn!(
                payment_id = %payment.id,
                transfer_id = %transfer_id,
                processor_status = snapshot.status.as_str(),
                "Ignoring transfer status for an already succeeded payment"
            );
        }
        return Ok(TransferSyncResult {
            payment_id: payment.id,
            transfer_id,
            processor_status: snapshot.status,
            previous_status: payment.status,
            status: payment.status,
            updated: false,
            paid_at: payment.paid_at,
            processor: snapshot.raw,
        });
    }

    let paid_at = (snapshot.status == TransferStatus::Completed).then_some(now);
    ledger
        .set_payment_status(&payment.id, resolved, paid_at)
        .await?;

    info!(
        payment_id = %payment.id,
        transfer_id = %transfer_id,
        from = %payment.status,
        to = %resolved,
        "Payment status synced from ACH transfer"
    );

    Ok(TransferSyncResult {
        payment_id: payment.id,
        transfer_id,
        processor_status: snapshot.status,
        previous_status: payment.status,
        status: resolved,
        updated: true,
        paid_at,
        processor: snapshot.raw,
    })
}
