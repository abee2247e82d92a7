//! Versioned default commission rates.
//!
//! When a policy carries no stored percentage for a class, the fallback
//! comes from exactly one place: the rate table in effect when the payout
//! is created. The table version is stamped into every breakdown so a
//! historical payout can be reproduced against the table that priced it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::RecipientClass;

/// Default percentage per recipient class, with a version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub version: String,
    pub main_agent: Decimal,
    pub affiliate: Decimal,
    pub ambassador: Decimal,
    pub investor: Decimal,
    pub company_expense: Decimal,
}

impl RateTable {
    /// The table currently in effect.
    ///
    /// Ships all-zero: a class with no percentage stored on the policy
    /// earns nothing. Non-zero business defaults belong here, in one
    /// versioned place, never at individual call sites.
    pub fn current() -> Self {
        Self::zero("2025-01")
    }

    /// All-zero defaults: classes without a stored percentage earn nothing.
    pub fn zero(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            main_agent: Decimal::ZERO,
            affiliate: Decimal::ZERO,
            ambassador: Decimal::ZERO,
            investor: Decimal::ZERO,
            company_expense: Decimal::ZERO,
        }
    }

    pub fn default_for(&self, class: RecipientClass) -> Decimal {
        match class {
            RecipientClass::MainAgent => self.main_agent,
            RecipientClass::Affiliate => self.affiliate,
            RecipientClass::Ambassador => self.ambassador,
            RecipientClass::Investor => self.investor,
            RecipientClass::CompanyExpense => self.company_expense,
        }
    }
}
