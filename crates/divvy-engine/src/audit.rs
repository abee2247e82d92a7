//! Audit entry construction and timeline reconstruction.
//!
//! Every payout transition is recorded exactly once: the ledger builds the
//! entry and the store appends it inside the same critical section as the
//! conditional write, so each payout's trail lists transitions in the order
//! they were applied. Timelines are derived views: audit entries (and
//! invoice issuance, for recipient timelines) merged into one time-ordered
//! list.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use divvy_core::{
    AuditAction, AuditLogEntry, Invoice, PayoutStatus, PolicyRef, RecipientClass,
};
use divvy_store::MemStore;

/// Build one audit entry for a payout transition.
///
/// The caller hands the entry to the store's conditional write, which
/// appends it under the same lock as the transition itself.
pub fn entry(
    payout_id: Uuid,
    action: AuditAction,
    actor: &str,
    before_state: Option<PayoutStatus>,
    after_state: Option<PayoutStatus>,
    note: Option<String>,
) -> AuditLogEntry {
    AuditLogEntry {
        payout_id,
        action,
        actor: actor.to_string(),
        timestamp: Utc::now(),
        before_state,
        after_state,
        note,
    }
}

/// Ordered audit entries for one payout.
pub fn audit_trail(store: &MemStore, payout_id: Uuid) -> Vec<AuditLogEntry> {
    store.audit_for_payout(payout_id)
}

/// One event on a flow timeline.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    PayoutTransition {
        policy: PolicyRef,
        recipient_class: RecipientClass,
        entry: AuditLogEntry,
    },
    InvoiceIssued {
        invoice: Invoice,
    },
}

impl TimelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEvent::PayoutTransition { entry, .. } => entry.timestamp,
            TimelineEvent::InvoiceIssued { invoice } => invoice.issued_at,
        }
    }
}

fn transition_events(store: &MemStore, payouts: &[divvy_core::Payout]) -> Vec<TimelineEvent> {
    let ids: Vec<Uuid> = payouts.iter().map(|p| p.id).collect();
    store
        .audit_for_payouts(&ids)
        .into_iter()
        .filter_map(|entry| {
            let payout = payouts.iter().find(|p| p.id == entry.payout_id)?;
            Some(TimelineEvent::PayoutTransition {
                policy: payout.policy.clone(),
                recipient_class: payout.recipient_class,
                entry,
            })
        })
        .collect()
}

/// Every transition of every payout belonging to a policy, time-ordered.
pub fn flow_timeline(store: &MemStore, policy: &PolicyRef) -> Vec<TimelineEvent> {
    let payouts = store.payouts_for_policy(policy);
    let mut events = transition_events(store, &payouts);
    events.sort_by_key(|e| e.timestamp());
    events
}

/// Payout transitions plus invoice issuance events for one recipient,
/// time-ordered.
pub fn recipient_timeline(
    store: &MemStore,
    class: RecipientClass,
    recipient_id: &str,
) -> Vec<TimelineEvent> {
    let payouts = store.payouts_for_recipient(class, recipient_id);
    let mut events = transition_events(store, &payouts);
    events.extend(
        store
            .invoices(Some(class), Some(recipient_id), None)
            .into_iter()
            .map(|invoice| TimelineEvent::InvoiceIssued { invoice }),
    );
    events.sort_by_key(|e| e.timestamp());
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use divvy_core::{PercentageOverrides, PolicySnapshot, RateTable, Settlement};
    use rust_decimal_macros::dec;

    use crate::{InvoiceIssuer, PayoutLedger};

    fn snapshot(policy_id: &str) -> PolicySnapshot {
        PolicySnapshot {
            policy: PolicyRef::new("life", policy_id),
            premium: dec!(100000),
            percentages: PercentageOverrides {
                main_agent: Some(dec!(10)),
                affiliate: Some(dec!(2)),
                ..PercentageOverrides::default()
            },
            main_agent_id: "agent-1".into(),
            affiliate_id: Some("aff-1".into()),
            ambassador_id: None,
            investor_id: None,
            company_id: None,
            commission_received: true,
        }
    }

    fn settlement() -> Settlement {
        Settlement {
            date: NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(),
            transaction_id: None,
            notes: None,
            actor: "ops".into(),
        }
    }

    #[test]
    fn flow_timeline_covers_every_payout_of_the_policy() {
        let store = Arc::new(MemStore::open());
        let ledger = PayoutLedger::new(Arc::clone(&store), RateTable::current());
        let snap = snapshot("P-1");

        let (agent, _) = ledger
            .find_or_create(&snap, RecipientClass::MainAgent, "ops")
            .unwrap();
        let (aff, _) = ledger
            .find_or_create(&snap, RecipientClass::Affiliate, "ops")
            .unwrap();
        ledger.mark_paid(agent.id, &settlement()).unwrap();
        ledger.cancel(aff.id, "affiliate left", "ops").unwrap();

        let events = flow_timeline(&store, &snap.policy);
        // Two Created, one MarkPaid, one Cancelled.
        assert_eq!(events.len(), 4);
        assert!(events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        let classes: Vec<RecipientClass> = events
            .iter()
            .map(|e| match e {
                TimelineEvent::PayoutTransition {
                    recipient_class, ..
                } => *recipient_class,
                TimelineEvent::InvoiceIssued { .. } => panic!("no invoices in this flow"),
            })
            .collect();
        assert!(classes.contains(&RecipientClass::MainAgent));
        assert!(classes.contains(&RecipientClass::Affiliate));
    }

    #[test]
    fn recipient_timeline_includes_invoice_issuance() {
        let store = Arc::new(MemStore::open());
        let ledger = PayoutLedger::new(Arc::clone(&store), RateTable::current());
        let issuer = InvoiceIssuer::new(Arc::clone(&store));

        let (payout, _) = ledger
            .find_or_create(&snapshot("P-1"), RecipientClass::Affiliate, "ops")
            .unwrap();
        ledger.mark_paid(payout.id, &settlement()).unwrap();
        issuer
            .issue_if_due(
                RecipientClass::Affiliate,
                "aff-1",
                divvy_core::Period::new(2026, 8).unwrap(),
            )
            .unwrap();

        let events = recipient_timeline(&store, RecipientClass::Affiliate, "aff-1");
        // Created, MarkPaid, InvoiceIssued.
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(TimelineEvent::InvoiceIssued { .. })
        ));
        // A different recipient sees nothing.
        assert!(recipient_timeline(&store, RecipientClass::Affiliate, "aff-2").is_empty());
    }
}
