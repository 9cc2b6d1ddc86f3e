use serde::Serialize;

use crate::{
    error::{AppError, AppResult},
    models::PaymentMethodKind,
};

/// Card fee: 2.9% plus 30 cents.
const CARD_RATE_PER_MILLE: i64 = 29;
const CARD_FIXED_CENTS: i64 = 30;
/// Bank debit fee: 0.8%, capped at 5.00.
const BANK_DEBIT_RATE_PER_MILLE: i64 = 8;
const BANK_DEBIT_CAP_CENTS: i64 = 500;
/// Largest amount a quote is computed for: 10,000,000.00.
const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeQuote {
    pub kind: PaymentMethodKind,
    pub amount: f64,
    pub fee: f64,
    pub description: String,
    pub total: f64,
}

impl FeeQuote {
    pub fn total_cents(&self) -> i64 {
        to_cents(self.total)
    }
}

pub fn calculate_fee(amount: f64, kind: PaymentMethodKind) -> AppResult<FeeQuote> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::BadRequest(
            "amount must be a non-negative number.".to_string(),
        ));
    }

    if amount * 100.0 > MAX_AMOUNT_CENTS as f64 {
        return Err(AppError::BadRequest(format!(
            "amount must not exceed {:.2}.",
            from_cents(MAX_AMOUNT_CENTS)
        )));
    }

    let amount_cents = to_cents(amount);
    let (fee_cents, description) = match kind {
        PaymentMethodKind::Card => (
            per_mille_half_up(amount_cents, CARD_RATE_PER_MILLE) + CARD_FIXED_CENTS,
            "Card processing fee (2.9% + $0.30)".to_string(),
        ),
        PaymentMethodKind::BankDebit => (
            per_mille_half_up(amount_cents, BANK_DEBIT_RATE_PER_MILLE).min(BANK_DEBIT_CAP_CENTS),
            "Bank debit fee (0.8%, max $5.00)".to_string(),
        ),
        PaymentMethodKind::AlternateAch => (0, "No processing fee for ACH transfers".to_string()),
    };

    Ok(FeeQuote {
        kind,
        amount: from_cents(amount_cents),
        fee: from_cents(fee_cents),
        description,
        total: from_cents(amount_cents + fee_cents),
    })
}

pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// `cents * rate / 1000`, rounded half-up on the cents digit.
fn per_mille_half_up(cents: i64, rate_per_mille: i64) -> i64 {
    (cents * rate_per_mille + 500) / 1000
}

#[cfg(test)]
mod tests {
    use super::{calculate_fee, to_cents};
    use crate::{error::AppError, models::PaymentMethodKind};

    fn fee(amount: f64, kind: PaymentMethodKind) -> f64 {
        calculate_fee(amount, kind).expect("valid amount").fee
    }

    #[test]
    fn card_on_one_hundred() {
        let quote = calculate_fee(100.0, PaymentMethodKind::Card).expect("quote");
        assert_eq!(quote.fee, 3.20);
        assert_eq!(quote.total, 103.20);
        assert_eq!(quote.total_cents(), 10320);
    }

    #[test]
    fn bank_debit_is_capped() {
        let quote = calculate_fee(1000.0, PaymentMethodKind::BankDebit).expect("quote");
        assert_eq!(quote.fee, 5.00);
        assert_eq!(quote.total, 1005.00);
        assert_eq!(fee(250.0, PaymentMethodKind::BankDebit), 2.00);
        assert_eq!(fee(625.0, PaymentMethodKind::BankDebit), 5.00);
        assert_eq!(fee(624.99, PaymentMethodKind::BankDebit), 5.00);
        assert_eq!(fee(600.0, PaymentMethodKind::BankDebit), 4.80);
    }

    #[test]
    fn card_fee_never_below_fixed_part() {
        for amount in [0.0, 0.01, 0.17, 1.0, 9.99, 1234.56, 25_000.0] {
            let card = fee(amount, PaymentMethodKind::Card);
            assert!(card >= 0.30, "{amount} produced {card}");
            let expected = ((amount * 0.029 + 0.30) * 100.0).round() / 100.0;
            assert!((card - expected).abs() < 0.005, "{amount}: {card} vs {expected}");
        }
    }

    #[test]
    fn rounds_half_up_on_cents() {
        // 50.00 * 0.029 = 1.45 exactly, + 0.30
        assert_eq!(fee(50.0, PaymentMethodKind::Card), 1.75);
        // 0.50 * 0.029 = 0.0145 -> 0.01
        assert_eq!(fee(0.5, PaymentMethodKind::Card), 0.31);
        // 0.63 * 0.008 = 0.00504 -> 0.01
        assert_eq!(fee(0.63, PaymentMethodKind::BankDebit), 0.01);
        // sub-cent amounts round half-up too
        assert_eq!(to_cents(3.125), 313);
    }

    #[test]
    fn ach_is_free() {
        for amount in [0.0, 1.0, 999_999.99] {
            let quote = calculate_fee(amount, PaymentMethodKind::AlternateAch).expect("quote");
            assert_eq!(quote.fee, 0.0);
            assert_eq!(quote.total, quote.amount);
        }
    }

    #[test]
    fn rejects_amounts_above_the_ceiling() {
        for amount in [10_000_000.01, 1e16, 1e300] {
            for kind in [
                PaymentMethodKind::Card,
                PaymentMethodKind::BankDebit,
                PaymentMethodKind::AlternateAch,
            ] {
                assert!(
                    matches!(calculate_fee(amount, kind), Err(AppError::BadRequest(_))),
                    "{amount} {kind:?}"
                );
            }
        }

        let largest = calculate_fee(10_000_000.0, PaymentMethodKind::Card).expect("quote");
        assert_eq!(largest.fee, 290_000.30);
        assert_eq!(largest.total_cents(), 1_029_000_030);
    }

    #[test]
    fn rejects_negative_and_non_finite_amounts() {
        assert!(calculate_fee(-1.0, PaymentMethodKind::Card).is_err());
        assert!(calculate_fee(f64::NAN, PaymentMethodKind::Card).is_err());
        assert!(calculate_fee(f64::INFINITY, PaymentMethodKind::BankDebit).is_err());
    }
}
