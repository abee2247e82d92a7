//! The commission calculator: PolicySnapshot → CommissionBreakdown.
//!
//! Pure and deterministic — the same snapshot and rate table always produce
//! the same breakdown, so callers are free to cache. The breakdown is never
//! persisted; payouts snapshot their amount from it at creation time.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::money::percentage_of;
use crate::rates::RateTable;
use crate::types::{PolicySnapshot, RecipientClass};

/// One class's share of a policy's commission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionShare {
    pub amount: Decimal,
    pub percentage: Decimal,
}

/// The computed split of a policy's commission across recipient classes.
///
/// A class is present only when the policy has a recipient attached for it,
/// so downstream code never creates a payout for a recipient that does not
/// exist. An empty breakdown means no commission is applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    shares: BTreeMap<RecipientClass, CommissionShare>,
    /// Rate-table version the defaults were drawn from.
    pub rate_version: String,
}

impl CommissionBreakdown {
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn share(&self, class: RecipientClass) -> Option<&CommissionShare> {
        self.shares.get(&class)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecipientClass, &CommissionShare)> {
        self.shares.iter().map(|(c, s)| (*c, s))
    }

    pub fn main_agent_amount(&self) -> Decimal {
        self.share(RecipientClass::MainAgent)
            .map(|s| s.amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of every share except the main agent's.
    pub fn non_main_total(&self) -> Decimal {
        self.shares
            .iter()
            .filter(|(c, _)| **c != RecipientClass::MainAgent)
            .map(|(_, s)| s.amount)
            .sum()
    }

    /// Whether downstream shares fit inside the main agent's commission.
    pub fn is_consistent(&self) -> bool {
        self.non_main_total() <= self.main_agent_amount()
    }
}

/// Compute the commission split for a policy.
///
/// A premium of zero or less yields an empty breakdown. A class whose
/// recipient id is absent on the snapshot is omitted entirely, not zeroed.
/// Missing percentages fall back to the rate table.
pub fn breakdown(snapshot: &PolicySnapshot, rates: &RateTable) -> CommissionBreakdown {
    let mut shares = BTreeMap::new();

    if snapshot.premium > Decimal::ZERO {
        for class in RecipientClass::ALL {
            if snapshot.recipient_id(class).is_none() {
                continue;
            }
            let percentage = snapshot
                .percentages
                .for_class(class)
                .unwrap_or_else(|| rates.default_for(class));
            let amount = percentage_of(snapshot.premium, percentage);
            shares.insert(class, CommissionShare { amount, percentage });
        }
    }

    let result = CommissionBreakdown {
        shares,
        rate_version: rates.version.clone(),
    };
    if !result.is_empty() && !result.is_consistent() {
        warn!(
            policy = %snapshot.policy,
            non_main = %result.non_main_total(),
            main_agent = %result.main_agent_amount(),
            "downstream shares exceed main-agent commission"
        );
    }
    result
}
