use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use divvy_core::{PayoutStatus, PolicyRef, RecipientClass};
use divvy_store::StoreError;

/// Failures surfaced by the distribution engine.
///
/// Duplicate submissions (already paid, already invoiced, cancel on an
/// already-cancelled payout) are not errors; they come back as successful
/// no-op outcomes so retried requests stay safe.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("override amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("policy not found: {0}")]
    PolicyNotFound(PolicyRef),

    #[error("payout not found: {0}")]
    PayoutNotFound(Uuid),

    #[error("policy {policy} has no {class} share in its breakdown")]
    RecipientNotApplicable {
        policy: PolicyRef,
        class: RecipientClass,
    },

    #[error("main-agent commission not yet received for {0}")]
    CommissionNotReceived(PolicyRef),

    #[error("payout {id} cannot move {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: PayoutStatus,
        to: PayoutStatus,
    },

    #[error("invoice number space exhausted, last candidate {0}")]
    InvoiceNumberExhausted(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PayoutNotFound(id) => EngineError::PayoutNotFound(id),
            other => EngineError::Store(other),
        }
    }
}
