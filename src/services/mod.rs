pub mod ach;
pub mod due_dates;
pub mod fees;
pub mod ledger;
pub mod payment_generation;
pub mod payments;
pub mod reconciliation;
