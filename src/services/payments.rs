use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::{PaymentMethodKind, PaymentStatus},
    services::ledger::PaymentLedger,
};

type HmacSha256 = Hmac<Sha256>;

const CARD_API_BASE: &str = "https://api.stripe.com/v1";
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct PaymentIntentRequest<'a> {
    pub amount_cents: i64,
    pub payment_id: &'a str,
    pub tenant_name: &'a str,
    pub kind: PaymentMethodKind,
    pub processor_payment_method: Option<&'a str>,
}

/// Creates a card processor payment intent and returns the processor payload.
pub async fn create_payment_intent(
    http_client: &Client,
    config: &AppConfig,
    request: &PaymentIntentRequest<'_>,
) -> AppResult<Value> {
    let secret_key = config
        .card_secret_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| AppError::Dependency("CARD_SECRET_KEY not configured.".to_string()))?;
    let method_type = request.kind.card_processor_type().ok_or_else(|| {
        AppError::BadRequest("ACH payment methods cannot be charged by card.".to_string())
    })?;
    if request.amount_cents <= 0 {
        return Err(AppError::BadRequest(
            "Payment amount must be positive.".to_string(),
        ));
    }

    let amount = request.amount_cents.to_string();
    let description = format!("Rent payment {} ({})", request.payment_id, request.tenant_name);
    let mut form = vec![
        ("amount", amount.as_str()),
        ("currency", config.card_currency.as_str()),
        ("payment_method_types[]", method_type),
        ("description", description.as_str()),
        ("metadata[payment_id]", request.payment_id),
    ];
    if let Some(method) = request.processor_payment_method.filter(|m| !m.is_empty()) {
        form.push(("payment_method", method));
    }

    let response = http_client
        .post(format!("{CARD_API_BASE}/payment_intents"))
        .basic_auth(secret_key, None::<&str>)
        .form(&form)
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Card processor request failed");
            AppError::Dependency("Card processor request failed.".to_string())
        })?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        Ok(body)
    } else {
        let message = body
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown card processor error");
        Err(AppError::Dependency(format!(
            "Card processor error ({status}): {message}"
        )))
    }
}

/// Verifies a webhook signature header of the form `t=<ts>,v1=<hex>`.
///
/// The signed payload is `<ts>.<body>` under HMAC-SHA256 with the shared
/// secret; the comparison is constant-time and stale timestamps are rejected.
pub fn verify_webhook_signature(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> bool {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            timestamp = Some(value);
        } else if let Some(value) = part.strip_prefix("v1=") {
            signatures.push(value);
        }
    }

    let Some(ts_str) = timestamp else {
        return false;
    };
    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };
    if (now_unix - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(delta = (now_unix - ts).abs(), "Webhook signature too old");
        return false;
    }

    let signed_payload = format!("{ts_str}.{payload}");
    signatures.into_iter().any(|candidate| {
        let Ok(expected) = hex_decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
            return false;
        };
        mac.update(signed_payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    })
}

/// Payment intent webhook events that move a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    Succeeded,
    Failed,
}

impl CardEvent {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "payment_intent.succeeded" => Some(Self::Succeeded),
            "payment_intent.payment_failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn payment_status(self) -> PaymentStatus {
        match self {
            Self::Succeeded => PaymentStatus::Succeeded,
            Self::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardEventOutcome {
    Updated,
    /// Redelivery: the payment already has the event's status.
    Unchanged,
    /// The payment already succeeded; later events do not move it.
    AlreadySucceeded,
}

/// Applies a verified card webhook event to its payment with at most one
/// write. paid_at is set on success and cleared on failure.
pub async fn apply_card_event(
    ledger: &dyn PaymentLedger,
    payment_id: &str,
    event: CardEvent,
    now: DateTime<Utc>,
) -> AppResult<CardEventOutcome> {
    let payment = ledger
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {payment_id} not found.")))?;

    let target = event.payment_status();
    if payment.status == target {
        return Ok(CardEventOutcome::Unchanged);
    }
    if payment.status == PaymentStatus::Succeeded {
        tracing::warn!(payment_id, event = ?event, "Card event for an already succeeded payment");
        return Ok(CardEventOutcome::AlreadySucceeded);
    }

    let paid_at = (event == CardEvent::Succeeded).then_some(now);
    ledger.set_payment_status(payment_id, target, paid_at).await?;
    tracing::info!(payment_id, from = %payment.status, to = %target, "Payment updated from card webhook");
    Ok(CardEventOutcome::Updated)
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
pub(crate) fn sign_webhook(payload: &str, secret: &str, ts: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(format!("{ts}.{payload}").as_bytes());
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("t={ts},v1={hex}")
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use reqwest::Client;

    use super::{
        apply_card_event, create_payment_intent, hex_decode, sign_webhook,
        verify_webhook_signature, CardEvent, CardEventOutcome, PaymentIntentRequest,
    };
    use crate::{
        config::test_config,
        error::AppError,
        models::{Payment, PaymentMethodKind, PaymentStatus},
        services::ledger::memory::MemoryLedger,
    };

    const NOW: i64 = 1_792_000_000;

    #[test]
    fn accepts_valid_signature() {
        let body = r#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_webhook(body, "whsec_test", NOW - 10);
        assert!(verify_webhook_signature(body, &header, "whsec_test", NOW));
    }

    #[test]
    fn rejects_tampered_body_wrong_secret_and_stale_timestamp() {
        let body = r#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_webhook(body, "whsec_test", NOW);
        assert!(!verify_webhook_signature("{}", &header, "whsec_test", NOW));
        assert!(!verify_webhook_signature(body, &header, "whsec_other", NOW));
        assert!(!verify_webhook_signature(body, &header, "whsec_test", NOW + 301));
        assert!(!verify_webhook_signature(body, "v1=abcd", "whsec_test", NOW));
        assert!(!verify_webhook_signature(body, "", "whsec_test", NOW));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = "{}";
        let valid = sign_webhook(body, "whsec_test", NOW);
        let rotated = valid.replacen("v1=", "v1=00ff,v1=", 1);
        assert!(verify_webhook_signature(body, &rotated, "whsec_test", NOW));
    }

    #[test]
    fn decodes_hex() {
        assert_eq!(hex_decode("00ff10"), Ok(vec![0x00, 0xff, 0x10]));
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }

    fn open_payment(status: PaymentStatus) -> MemoryLedger {
        let ledger = MemoryLedger::default();
        ledger.payments.lock().expect("lock").push(Payment {
            id: "pay-1".to_string(),
            tenant_id: "ten-1".to_string(),
            property_id: "prop-1".to_string(),
            amount: 1200.0,
            status,
            transfer_id: None,
            payment_intent_id: Some("pi_1".to_string()),
            payment_method_id: None,
            due_date: NaiveDate::from_ymd_opt(2026, 11, 1).expect("date"),
            paid_at: None,
        });
        ledger
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, 1, 9, 30, 0).single().expect("time")
    }

    #[test]
    fn recognizes_payment_intent_events() {
        assert_eq!(
            CardEvent::from_event_type("payment_intent.succeeded"),
            Some(CardEvent::Succeeded)
        );
        assert_eq!(
            CardEvent::from_event_type("payment_intent.payment_failed"),
            Some(CardEvent::Failed)
        );
        assert_eq!(CardEvent::from_event_type("customer.created"), None);
    }

    #[tokio::test]
    async fn succeeded_event_marks_payment_paid() {
        let ledger = open_payment(PaymentStatus::Processing);

        let outcome = apply_card_event(&ledger, "pay-1", CardEvent::Succeeded, at())
            .await
            .expect("apply");

        assert_eq!(outcome, CardEventOutcome::Updated);
        assert_eq!(ledger.writes(), 1);
        let stored = ledger.payment("pay-1").expect("payment");
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(stored.paid_at, Some(at()));
    }

    #[tokio::test]
    async fn failed_event_clears_paid_at() {
        let ledger = open_payment(PaymentStatus::Processing);
        ledger.payments.lock().expect("lock")[0].paid_at = Some(at());

        let outcome = apply_card_event(&ledger, "pay-1", CardEvent::Failed, at())
            .await
            .expect("apply");

        assert_eq!(outcome, CardEventOutcome::Updated);
        let stored = ledger.payment("pay-1").expect("payment");
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.paid_at, None);
    }

    #[tokio::test]
    async fn redelivered_event_does_not_write() {
        let ledger = open_payment(PaymentStatus::Processing);

        apply_card_event(&ledger, "pay-1", CardEvent::Succeeded, at())
            .await
            .expect("first delivery");
        let later = at() + chrono::Duration::minutes(5);
        let outcome = apply_card_event(&ledger, "pay-1", CardEvent::Succeeded, later)
            .await
            .expect("redelivery");

        assert_eq!(outcome, CardEventOutcome::Unchanged);
        assert_eq!(ledger.writes(), 1);
        assert_eq!(ledger.payment("pay-1").and_then(|p| p.paid_at), Some(at()));
    }

    #[tokio::test]
    async fn late_failure_does_not_revert_a_succeeded_payment() {
        let ledger = open_payment(PaymentStatus::Processing);
        apply_card_event(&ledger, "pay-1", CardEvent::Succeeded, at())
            .await
            .expect("success");

        let outcome = apply_card_event(&ledger, "pay-1", CardEvent::Failed, at())
            .await
            .expect("late failure");

        assert_eq!(outcome, CardEventOutcome::AlreadySucceeded);
        assert_eq!(ledger.writes(), 1);
        let stored = ledger.payment("pay-1").expect("payment");
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(stored.paid_at, Some(at()));
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let ledger = open_payment(PaymentStatus::Processing);
        let result = apply_card_event(&ledger, "pay-404", CardEvent::Succeeded, at()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(ledger.writes(), 0);
    }

    #[tokio::test]
    async fn intent_requires_secret_key_and_card_kind() {
        let client = Client::new();
        let mut config = test_config();
        let request = PaymentIntentRequest {
            amount_cents: 10320,
            payment_id: "pay-1",
            tenant_name: "Ada Lovelace",
            kind: PaymentMethodKind::Card,
            processor_payment_method: None,
        };
        assert!(matches!(
            create_payment_intent(&client, &config, &request).await,
            Err(AppError::Dependency(_))
        ));

        config.card_secret_key = Some("sk_test".to_string());
        let ach = PaymentIntentRequest {
            kind: PaymentMethodKind::AlternateAch,
            ..request
        };
        assert!(matches!(
            create_payment_intent(&client, &config, &ach).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
