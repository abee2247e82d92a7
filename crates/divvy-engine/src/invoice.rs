//! Idempotent invoice issuance.
//!
//! One invoice per (recipient_class, recipient_id, period), rolling up the
//! paid payouts whose settlement date falls in the period. Number generation
//! is bounded: a few random candidates, then one deterministic
//! sequence-backed fallback. There is no unbounded retry loop.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use divvy_core::{Invoice, InvoiceStatus, Period, RecipientClass};
use divvy_store::{InvoiceInsert, MemStore};

use crate::EngineError;

/// Random candidates tried before the sequence-backed fallback.
const MAX_RANDOM_ATTEMPTS: usize = 5;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 5;

/// Result of an issuance request. `AlreadyIssued` is a successful no-op.
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    Issued(Invoice),
    AlreadyIssued(Invoice),
    /// No paid payouts in the period; nothing was persisted.
    NothingDue,
}

impl IssueOutcome {
    pub fn invoice(&self) -> Option<&Invoice> {
        match self {
            IssueOutcome::Issued(inv) | IssueOutcome::AlreadyIssued(inv) => Some(inv),
            IssueOutcome::NothingDue => None,
        }
    }

    pub fn already_issued(&self) -> bool {
        matches!(self, IssueOutcome::AlreadyIssued(_))
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Issues recipient invoices over the store's uniqueness guarantees.
#[derive(Clone)]
pub struct InvoiceIssuer {
    store: Arc<MemStore>,
}

impl InvoiceIssuer {
    pub fn new(store: Arc<MemStore>) -> Self {
        Self { store }
    }

    /// Issue the invoice for a recipient's period if one is due.
    ///
    /// Idempotent: an existing invoice (including one created by a
    /// concurrent request between our existence check and our insert) comes
    /// back as `AlreadyIssued`, never as an error.
    pub fn issue_if_due(
        &self,
        class: RecipientClass,
        recipient_id: &str,
        period: Period,
    ) -> Result<IssueOutcome, EngineError> {
        self.issue_inner(class, recipient_id, period, random_suffix)
    }

    fn issue_inner(
        &self,
        class: RecipientClass,
        recipient_id: &str,
        period: Period,
        mut suffix: impl FnMut() -> String,
    ) -> Result<IssueOutcome, EngineError> {
        if let Some(existing) = self.store.invoice_for(class, recipient_id, period) {
            debug!(number = %existing.invoice_number, "invoice already issued");
            return Ok(IssueOutcome::AlreadyIssued(existing));
        }

        let paid = self.store.paid_payouts_in_period(class, recipient_id, period);
        let total: Decimal = paid.iter().map(|p| p.amount).sum();
        if total <= Decimal::ZERO {
            debug!(class = %class, recipient_id, period = %period, "nothing due");
            return Ok(IssueOutcome::NothingDue);
        }

        let date_part = Utc::now().format("%Y%m%d").to_string();
        let make_invoice = |invoice_number: String| Invoice {
            invoice_number,
            recipient_class: class,
            recipient_id: recipient_id.to_string(),
            period,
            // Underlying payouts are already settled.
            status: InvoiceStatus::Paid,
            total_amount: total,
            issued_at: Utc::now(),
        };

        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let number = format!("INV-{}-{}-{}", class.invoice_code(), date_part, suffix());
            match self.store.insert_invoice_if_absent(make_invoice(number))? {
                InvoiceInsert::Created(invoice) => {
                    info!(number = %invoice.invoice_number, total = %invoice.total_amount, "invoice issued");
                    return Ok(IssueOutcome::Issued(invoice));
                }
                // Lost the race on the recipient key: same answer as the
                // up-front existence check.
                InvoiceInsert::ExistingKey(existing) => {
                    return Ok(IssueOutcome::AlreadyIssued(existing));
                }
                InvoiceInsert::NumberTaken => continue,
            }
        }

        // Deterministic fallback once the random candidates are spent.
        let seq = self.store.next_invoice_sequence()?;
        let number = format!("INV-{}-{}-S{:05}", class.invoice_code(), date_part, seq);
        warn!(number = %number, "random invoice numbers exhausted, using sequence fallback");
        match self.store.insert_invoice_if_absent(make_invoice(number.clone()))? {
            InvoiceInsert::Created(invoice) => Ok(IssueOutcome::Issued(invoice)),
            InvoiceInsert::ExistingKey(existing) => Ok(IssueOutcome::AlreadyIssued(existing)),
            InvoiceInsert::NumberTaken => Err(EngineError::InvoiceNumberExhausted(number)),
        }
    }

    /// Invoices matching the given filters.
    pub fn find_invoices(
        &self,
        class: Option<RecipientClass>,
        recipient_id: Option<&str>,
        period: Option<Period>,
    ) -> Vec<Invoice> {
        self.store.invoices(class, recipient_id, period)
    }
}
