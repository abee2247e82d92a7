//! Batch distribution: find-or-create then mark-paid per item, with
//! isolated failures and a post-batch invoice pass.
//!
//! A batch models a best-effort job, not one atomic multi-row transaction:
//! each payout's commit stands on its own for its recipient, so one bad
//! item never rolls back or blocks the others. Items run on a bounded
//! worker pool; cross-item ordering is not guaranteed.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use rust_decimal::Decimal;
use tracing::{info, warn};

use divvy_core::{Invoice, Payout, Period, PolicyRef, PolicySnapshot, RecipientClass, Settlement};

use crate::{EngineError, InvoiceIssuer, IssueOutcome, PayoutLedger};

/// Upstream policy-management contract. The engine never owns policy data;
/// it only reads snapshots through this seam.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// The current snapshot for a policy, or `None` if no such policy exists.
    async fn policy_snapshot(
        &self,
        policy: &PolicyRef,
    ) -> Result<Option<PolicySnapshot>, EngineError>;
}

/// Provider over a fixed snapshot set (tests and file-fed CLI runs).
pub struct StaticPolicyProvider {
    policies: HashMap<PolicyRef, PolicySnapshot>,
}

impl StaticPolicyProvider {
    pub fn new(snapshots: Vec<PolicySnapshot>) -> Self {
        Self {
            policies: snapshots
                .into_iter()
                .map(|s| (s.policy.clone(), s))
                .collect(),
        }
    }
}

#[async_trait]
impl PolicyProvider for StaticPolicyProvider {
    async fn policy_snapshot(
        &self,
        policy: &PolicyRef,
    ) -> Result<Option<PolicySnapshot>, EngineError> {
        Ok(self.policies.get(policy).cloned())
    }
}

/// One distribution request: pay this class's share of this policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub policy: PolicyRef,
    pub recipient_class: RecipientClass,
}

/// A committed (or duplicate-suppressed) item.
#[derive(Debug, Clone)]
pub struct DistributionReceipt {
    pub item: BatchItem,
    pub payout: Payout,
    pub already_paid: bool,
}

/// An item that did not commit. The rest of the batch is unaffected.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub item: BatchItem,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<DistributionReceipt>,
    pub failed: Vec<FailedItem>,
    /// Invoices newly issued by the post-batch pass.
    pub invoices: Vec<Invoice>,
}

const DEFAULT_CONCURRENCY: usize = 8;

/// Orchestrates ledger transitions and invoice issuance.
pub struct DistributionCoordinator {
    ledger: PayoutLedger,
    issuer: InvoiceIssuer,
    provider: Arc<dyn PolicyProvider>,
    concurrency: usize,
}

impl DistributionCoordinator {
    pub fn new(
        ledger: PayoutLedger,
        issuer: InvoiceIssuer,
        provider: Arc<dyn PolicyProvider>,
    ) -> Self {
        Self {
            ledger,
            issuer,
            provider,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Cap for in-flight items during a batch.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Distribute a batch with shared settlement metadata.
    pub async fn distribute(&self, items: Vec<BatchItem>, settlement: &Settlement) -> BatchResult {
        self.distribute_with_cancel(items, settlement, &AtomicBool::new(false))
            .await
    }

    /// Like [`distribute`](Self::distribute), with a cooperative stop flag.
    ///
    /// Raising the flag only keeps not-yet-started items from starting;
    /// transitions already committed stay committed.
    pub async fn distribute_with_cancel(
        &self,
        items: Vec<BatchItem>,
        settlement: &Settlement,
        cancel: &AtomicBool,
    ) -> BatchResult {
        let total = items.len();
        let outcomes: Vec<Result<DistributionReceipt, FailedItem>> = stream::iter(items)
            .map(|item| self.process_item(item, settlement, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut result = BatchResult::default();
        for outcome in outcomes {
            match outcome {
                Ok(receipt) => result.succeeded.push(receipt),
                Err(failed) => result.failed.push(failed),
            }
        }

        result.invoices = self.issue_for_receipts(&result.succeeded);
        info!(
            total,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            invoices = result.invoices.len(),
            "batch distribution finished"
        );
        result
    }

    /// Manual transfer outside the calculated breakdown.
    ///
    /// The override must be positive; this is checked before any mutation.
    /// If the payout already exists its fixed amount wins over the override.
    pub async fn distribute_adhoc(
        &self,
        policy: &PolicyRef,
        class: RecipientClass,
        amount_override: Decimal,
        settlement: &Settlement,
    ) -> Result<DistributionReceipt, EngineError> {
        if amount_override <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(amount_override));
        }
        let snapshot = self
            .provider
            .policy_snapshot(policy)
            .await?
            .ok_or_else(|| EngineError::PolicyNotFound(policy.clone()))?;
        if !snapshot.commission_received {
            return Err(EngineError::CommissionNotReceived(policy.clone()));
        }

        let (payout, _) = self.ledger.find_or_create_with_amount(
            &snapshot,
            class,
            Some(amount_override),
            &settlement.actor,
        )?;
        let outcome = self.ledger.mark_paid(payout.id, settlement)?;
        let receipt = DistributionReceipt {
            item: BatchItem {
                policy: policy.clone(),
                recipient_class: class,
            },
            payout: outcome.payout,
            already_paid: outcome.already_paid,
        };
        self.issue_for_receipts(std::slice::from_ref(&receipt));
        Ok(receipt)
    }

    async fn process_item(
        &self,
        item: BatchItem,
        settlement: &Settlement,
        cancel: &AtomicBool,
    ) -> Result<DistributionReceipt, FailedItem> {
        let fail = |reason: String| FailedItem {
            item: item.clone(),
            reason,
        };
        if cancel.load(Ordering::SeqCst) {
            return Err(fail("cancelled before start".to_string()));
        }

        let snapshot = match self.provider.policy_snapshot(&item.policy).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return Err(fail(
                    EngineError::PolicyNotFound(item.policy.clone()).to_string(),
                ));
            }
            Err(err) => return Err(fail(err.to_string())),
        };
        if !snapshot.commission_received {
            return Err(fail(
                EngineError::CommissionNotReceived(item.policy.clone()).to_string(),
            ));
        }

        let settle = || -> Result<_, EngineError> {
            let (payout, _) =
                self.ledger
                    .find_or_create(&snapshot, item.recipient_class, &settlement.actor)?;
            self.ledger.mark_paid(payout.id, settlement)
        };
        match settle() {
            Ok(outcome) => Ok(DistributionReceipt {
                item,
                payout: outcome.payout,
                already_paid: outcome.already_paid,
            }),
            Err(err) => Err(fail(err.to_string())),
        }
    }

    /// Run the invoice issuer once per distinct recipient-period touched.
    fn issue_for_receipts(&self, receipts: &[DistributionReceipt]) -> Vec<Invoice> {
        let recipients: BTreeSet<(RecipientClass, String, Period)> = receipts
            .iter()
            .filter_map(|r| {
                let date = r.payout.settlement_date?;
                Some((
                    r.payout.recipient_class,
                    r.payout.recipient_id.clone(),
                    Period::from_date(date),
                ))
            })
            .collect();

        let mut issued = Vec::new();
        for (class, recipient_id, period) in recipients {
            match self.issuer.issue_if_due(class, &recipient_id, period) {
                Ok(IssueOutcome::Issued(invoice)) => issued.push(invoice),
                Ok(_) => {}
                Err(err) => {
                    warn!(class = %class, recipient_id, period = %period, error = %err, "invoice issuance failed");
                }
            }
        }
        issued
    }
}
