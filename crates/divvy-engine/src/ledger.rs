//! The payout ledger: find-or-create plus the status state machine.
//!
//! State machine: pending → {processing, paid, cancelled};
//! processing → {paid, cancelled}; paid and cancelled are terminal.
//! Every durable transition appends exactly one audit entry, pushed by the
//! store inside the same critical section as the winning conditional write,
//! so a payout's trail is always ordered the way its transitions happened.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use divvy_core::{
    AuditAction, Payout, PayoutStatus, PolicyRef, PolicySnapshot, RateTable, RecipientClass,
    Settlement, breakdown,
};
use divvy_store::{CasOutcome, MemStore, PayoutInsert};

use crate::EngineError;
use crate::audit;

/// Result of a mark-paid request.
///
/// `already_paid` means another request settled the payout first; that is
/// duplicate suppression, reported as success rather than a conflict.
#[derive(Debug, Clone)]
pub struct MarkPaidOutcome {
    pub payout: Payout,
    pub already_paid: bool,
}

/// Ledger over the payout table. Cheap to clone and share.
#[derive(Clone)]
pub struct PayoutLedger {
    store: Arc<MemStore>,
    rates: RateTable,
}

impl PayoutLedger {
    pub fn new(store: Arc<MemStore>, rates: RateTable) -> Self {
        Self { store, rates }
    }

    pub fn store(&self) -> &Arc<MemStore> {
        &self.store
    }

    /// Look up the payout for (policy, class), creating it pending if absent.
    ///
    /// The amount is snapshotted from the breakdown at creation and never
    /// recomputed. Returns the payout and whether this call created it.
    pub fn find_or_create(
        &self,
        snapshot: &PolicySnapshot,
        class: RecipientClass,
        actor: &str,
    ) -> Result<(Payout, bool), EngineError> {
        self.find_or_create_with_amount(snapshot, class, None, actor)
    }

    /// Like [`find_or_create`](Self::find_or_create), but with an explicit
    /// amount for manual transfers outside the calculated breakdown. The
    /// recipient must still exist on the policy. The override only matters
    /// at creation; an existing payout keeps its fixed amount.
    pub fn find_or_create_with_amount(
        &self,
        snapshot: &PolicySnapshot,
        class: RecipientClass,
        amount_override: Option<Decimal>,
        actor: &str,
    ) -> Result<(Payout, bool), EngineError> {
        let not_applicable = || EngineError::RecipientNotApplicable {
            policy: snapshot.policy.clone(),
            class,
        };
        let recipient_id = snapshot.recipient_id(class).ok_or_else(not_applicable)?;

        let amount = match amount_override {
            Some(amount) => amount,
            None => {
                let split = breakdown(snapshot, &self.rates);
                split.share(class).ok_or_else(not_applicable)?.amount
            }
        };

        let candidate = Payout {
            id: Uuid::new_v4(),
            policy: snapshot.policy.clone(),
            recipient_class: class,
            recipient_id: recipient_id.to_string(),
            amount,
            status: PayoutStatus::Pending,
            transaction_id: None,
            settlement_date: None,
            notes: None,
            processed_by: None,
            processed_at: None,
            created_at: Utc::now(),
        };

        let created_entry = audit::entry(
            candidate.id,
            AuditAction::Created,
            actor,
            None,
            Some(PayoutStatus::Pending),
            None,
        );
        match self.store.insert_payout_if_absent(candidate, created_entry)? {
            PayoutInsert::Created(payout) => {
                info!(payout = %payout.id, policy = %payout.policy, class = %class, amount = %payout.amount, "payout created");
                Ok((payout, true))
            }
            PayoutInsert::Existing(payout) => {
                debug!(payout = %payout.id, policy = %payout.policy, class = %class, "payout already exists");
                Ok((payout, false))
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Payout, EngineError> {
        Ok(self.store.payout(id)?)
    }

    pub fn payouts_for_policy(&self, policy: &PolicyRef) -> Vec<Payout> {
        self.store.payouts_for_policy(policy)
    }

    /// pending → processing. Idempotent if already processing.
    pub fn mark_processing(&self, id: Uuid, actor: &str) -> Result<Payout, EngineError> {
        let outcome = self.store.cas_payout_status(
            id,
            &[PayoutStatus::Pending],
            PayoutStatus::Processing,
            |_| {},
            |previous| {
                audit::entry(
                    id,
                    AuditAction::MarkProcessing,
                    actor,
                    Some(previous),
                    Some(PayoutStatus::Processing),
                    None,
                )
            },
        )?;
        match outcome {
            CasOutcome::Applied { payout, .. } => Ok(payout),
            CasOutcome::AlreadyThere(payout) => Ok(payout),
            CasOutcome::Refused { current } => Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: PayoutStatus::Processing,
            }),
        }
    }

    /// pending|processing → paid, atomically.
    ///
    /// Concurrent duplicate calls resolve to exactly one durable transition
    /// and one audit entry; the loser gets `already_paid = true` with the
    /// winner's settlement intact.
    pub fn mark_paid(
        &self,
        id: Uuid,
        settlement: &Settlement,
    ) -> Result<MarkPaidOutcome, EngineError> {
        let outcome = self.store.cas_payout_status(
            id,
            &[PayoutStatus::Pending, PayoutStatus::Processing],
            PayoutStatus::Paid,
            |payout| {
                payout.settlement_date = Some(settlement.date);
                payout.transaction_id = settlement.transaction_id.clone();
                if settlement.notes.is_some() {
                    payout.notes = settlement.notes.clone();
                }
                payout.processed_by = Some(settlement.actor.clone());
                payout.processed_at = Some(Utc::now());
            },
            |previous| {
                audit::entry(
                    id,
                    AuditAction::MarkPaid,
                    &settlement.actor,
                    Some(previous),
                    Some(PayoutStatus::Paid),
                    settlement.notes.clone(),
                )
            },
        )?;
        match outcome {
            CasOutcome::Applied { payout, .. } => {
                info!(payout = %id, actor = %settlement.actor, date = %settlement.date, "payout marked paid");
                Ok(MarkPaidOutcome {
                    payout,
                    already_paid: false,
                })
            }
            CasOutcome::AlreadyThere(payout) => {
                debug!(payout = %id, "mark-paid duplicate suppressed");
                Ok(MarkPaidOutcome {
                    payout,
                    already_paid: true,
                })
            }
            CasOutcome::Refused { current } => Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: PayoutStatus::Paid,
            }),
        }
    }

    /// pending|processing → cancelled. Idempotent if already cancelled;
    /// a paid payout can never be cancelled.
    pub fn cancel(&self, id: Uuid, reason: &str, actor: &str) -> Result<Payout, EngineError> {
        let outcome = self.store.cas_payout_status(
            id,
            &[PayoutStatus::Pending, PayoutStatus::Processing],
            PayoutStatus::Cancelled,
            |payout| {
                payout.notes = Some(reason.to_string());
            },
            |previous| {
                audit::entry(
                    id,
                    AuditAction::Cancelled,
                    actor,
                    Some(previous),
                    Some(PayoutStatus::Cancelled),
                    Some(reason.to_string()),
                )
            },
        )?;
        match outcome {
            CasOutcome::Applied { payout, .. } => {
                info!(payout = %id, actor, reason, "payout cancelled");
                Ok(payout)
            }
            CasOutcome::AlreadyThere(payout) => Ok(payout),
            CasOutcome::Refused { current } => Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: PayoutStatus::Cancelled,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use divvy_core::PercentageOverrides;
    use rust_decimal_macros::dec;

    fn snapshot(policy_id: &str) -> PolicySnapshot {
        PolicySnapshot {
            policy: PolicyRef::new("life", policy_id),
            premium: dec!(100000),
            percentages: PercentageOverrides {
                main_agent: Some(dec!(10)),
                affiliate: Some(dec!(2)),
                ambassador: Some(dec!(2)),
                investor: Some(dec!(1)),
                company_expense: Some(dec!(3)),
            },
            main_agent_id: "agent-1".into(),
            affiliate_id: Some("aff-1".into()),
            ambassador_id: Some("amb-1".into()),
            investor_id: None,
            company_id: None,
            commission_received: true,
        }
    }

    fn ledger() -> PayoutLedger {
        PayoutLedger::new(Arc::new(MemStore::open()), RateTable::current())
    }

    fn settlement() -> Settlement {
        Settlement {
            date: NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(),
            transaction_id: Some("TX-1".into()),
            notes: None,
            actor: "ops".into(),
        }
    }

    #[test]
    fn creates_pending_with_breakdown_amount() {
        let ledger = ledger();
        let (payout, created) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        assert!(created);
        assert_eq!(payout.status, PayoutStatus::Pending);
        assert_eq!(payout.amount, dec!(2000.00));
        assert_eq!(payout.recipient_id, "aff-1");

        let trail = audit::audit_trail(ledger.store(), payout.id);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Created);
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let ledger = ledger();
        let snap = snapshot("P-1");
        let (first, created) = ledger
            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
            .unwrap();
        assert!(created);
        let (second, created_again) = ledger
            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        // No second Created audit entry.
        assert_eq!(audit::audit_trail(ledger.store(), first.id).len(), 1);
    }

    #[test]
    fn omitted_class_is_not_applicable() {
        let ledger = ledger();
        let result = ledger.find_or_create(&snapshot("P-1"), RecipientClass::Investor, "ops");
        assert!(matches!(
            result,
            Err(EngineError::RecipientNotApplicable { .. })
        ));
    }

    #[test]
    fn amount_is_fixed_at_creation() {
        let ledger = ledger();
        let mut snap = snapshot("P-1");
        let (first, _) = ledger
            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
            .unwrap();
        assert_eq!(first.amount, dec!(2000.00));

        // Premium doubles afterwards; the stored payout must not move.
        snap.premium = dec!(200000);
        let (second, created) = ledger
            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
            .unwrap();
        assert!(!created);
        assert_eq!(second.amount, dec!(2000.00));
    }

    #[test]
    fn override_amount_used_at_creation_only() {
        let ledger = ledger();
        let snap = snapshot("P-1");
        let (first, _) = ledger
            .find_or_create_with_amount(&snap, RecipientClass::Affiliate, Some(dec!(750)), "ops")
            .unwrap();
        assert_eq!(first.amount, dec!(750));

        let (second, _) = ledger
            .find_or_create_with_amount(&snap, RecipientClass::Affiliate, Some(dec!(999)), "ops")
            .unwrap();
        assert_eq!(second.amount, dec!(750));
    }

    #[test]
    fn processing_transition_and_idempotency() {
        let ledger = ledger();
        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        let p = ledger.mark_processing(payout.id, "ops").unwrap();
        assert_eq!(p.status, PayoutStatus::Processing);
        // Second call is a no-op, not an error.
        let p = ledger.mark_processing(payout.id, "ops").unwrap();
        assert_eq!(p.status, PayoutStatus::Processing);
        // Exactly one MarkProcessing entry.
        let transitions: Vec<_> = audit::audit_trail(ledger.store(), payout.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::MarkProcessing)
            .collect();
        assert_eq!(transitions.len(), 1);
    }

    #[test]
    fn mark_paid_from_pending_and_from_processing() {
        let ledger = ledger();
        let (a, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        let outcome = ledger.mark_paid(a.id, &settlement()).unwrap();
        assert!(!outcome.already_paid);
        assert_eq!(outcome.payout.status, PayoutStatus::Paid);
        assert_eq!(outcome.payout.processed_by.as_deref(), Some("ops"));

        let (b, _) = ledger
            .find_or_create(&snapshot("P-2"), RecipientClass::Affiliate, "ops")
            .unwrap();
        ledger.mark_processing(b.id, "ops").unwrap();
        let outcome = ledger.mark_paid(b.id, &settlement()).unwrap();
        assert!(!outcome.already_paid);
    }

    #[test]
    fn duplicate_mark_paid_is_suppressed() {
        let ledger = ledger();
        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        let first = ledger.mark_paid(payout.id, &settlement()).unwrap();
        assert!(!first.already_paid);

        let mut retry = settlement();
        retry.transaction_id = Some("TX-2".into());
        let second = ledger.mark_paid(payout.id, &retry).unwrap();
        assert!(second.already_paid);
        // The winner's settlement is untouched.
        assert_eq!(second.payout.transaction_id.as_deref(), Some("TX-1"));
        // Exactly one paid transition in the audit log.
        let paid_entries: Vec<_> = audit::audit_trail(ledger.store(), payout.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::MarkPaid)
            .collect();
        assert_eq!(paid_entries.len(), 1);
    }

    #[test]
    fn concurrent_mark_paid_yields_one_transition() {
        let ledger = ledger();
        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        let id = payout.id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.mark_paid(id, &settlement()).unwrap())
            })
            .collect();
        let outcomes: Vec<MarkPaidOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Every caller reports success; exactly one won the transition.
        let winners = outcomes.iter().filter(|o| !o.already_paid).count();
        assert_eq!(winners, 1);
        let paid_entries: Vec<_> = audit::audit_trail(ledger.store(), id)
            .into_iter()
            .filter(|e| e.action == AuditAction::MarkPaid)
            .collect();
        assert_eq!(paid_entries.len(), 1);
    }

    #[test]
    fn concurrent_create_and_pay_keeps_trail_ordered() {
        // Two administrators race the whole find-or-create + mark-paid
        // sequence on the same key. Whoever loses the insert may reach
        // mark_paid first, but the trail must still start with Created.
        for _ in 0..50 {
            let ledger = ledger();
            let snap = snapshot("P-1");

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let ledger = ledger.clone();
                    let snap = snap.clone();
                    std::thread::spawn(move || {
                        let (payout, _) = ledger
                            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
                            .unwrap();
                        ledger.mark_paid(payout.id, &settlement()).unwrap();
                        payout.id
                    })
                })
                .collect();
            let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(ids[0], ids[1]);

            let trail = audit::audit_trail(ledger.store(), ids[0]);
            let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
            assert_eq!(actions, [AuditAction::Created, AuditAction::MarkPaid]);
            assert_eq!(trail[1].before_state, Some(PayoutStatus::Pending));
        }
    }

    #[test]
    fn cancel_rules() {
        let ledger = ledger();
        let (a, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        let cancelled = ledger.cancel(a.id, "mistyped policy", "ops").unwrap();
        assert_eq!(cancelled.status, PayoutStatus::Cancelled);
        assert_eq!(cancelled.notes.as_deref(), Some("mistyped policy"));
        // Cancel again: idempotent no-op.
        ledger.cancel(a.id, "again", "ops").unwrap();
        let cancel_entries: Vec<_> = audit::audit_trail(ledger.store(), a.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::Cancelled)
            .collect();
        assert_eq!(cancel_entries.len(), 1);
    }

    #[test]
    fn paid_payout_cannot_be_cancelled() {
        let ledger = ledger();
        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        ledger.mark_paid(payout.id, &settlement()).unwrap();

        let result = ledger.cancel(payout.id, "too late", "ops");
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition {
                from: PayoutStatus::Paid,
                to: PayoutStatus::Cancelled,
                ..
            })
        ));
        // Record unchanged.
        let payout = ledger.get(payout.id).unwrap();
        assert_eq!(payout.status, PayoutStatus::Paid);
        assert_ne!(payout.notes.as_deref(), Some("too late"));
    }

    #[test]
    fn cancelled_payout_cannot_be_paid_or_processed() {
        let ledger = ledger();
        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        ledger.cancel(payout.id, "void", "ops").unwrap();

        assert!(matches!(
            ledger.mark_paid(payout.id, &settlement()),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.mark_processing(payout.id, "ops"),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unknown_payout_is_not_found() {
        let ledger = ledger();
        assert!(matches!(
            ledger.mark_paid(Uuid::new_v4(), &settlement()),
            Err(EngineError::PayoutNotFound(_))
        ));
    }
}
