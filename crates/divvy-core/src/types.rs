//! Shared domain types for the distribution engine.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::period::Period;

/// Which tier of the network a commission share belongs to.
///
/// One Payout entity with a class discriminant replaces the per-tier tables
/// the admin backend used to keep; lookup and uniqueness live in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientClass {
    MainAgent,
    Affiliate,
    /// Ambassador and distributor are the same tier under two names.
    Ambassador,
    Investor,
    CompanyExpense,
}

impl RecipientClass {
    pub const ALL: [RecipientClass; 5] = [
        RecipientClass::MainAgent,
        RecipientClass::Affiliate,
        RecipientClass::Ambassador,
        RecipientClass::Investor,
        RecipientClass::CompanyExpense,
    ];

    /// Stable snake_case code, matches the serde representation.
    pub fn code(&self) -> &'static str {
        match self {
            RecipientClass::MainAgent => "main_agent",
            RecipientClass::Affiliate => "affiliate",
            RecipientClass::Ambassador => "ambassador",
            RecipientClass::Investor => "investor",
            RecipientClass::CompanyExpense => "company_expense",
        }
    }

    /// Short uppercase token used in invoice numbers.
    pub fn invoice_code(&self) -> &'static str {
        match self {
            RecipientClass::MainAgent => "MAIN",
            RecipientClass::Affiliate => "AFF",
            RecipientClass::Ambassador => "AMB",
            RecipientClass::Investor => "INVST",
            RecipientClass::CompanyExpense => "COMP",
        }
    }

    /// Parse a snake_case code (also accepts "distributor" for ambassador).
    pub fn parse(s: &str) -> Option<RecipientClass> {
        match s {
            "main_agent" => Some(RecipientClass::MainAgent),
            "affiliate" => Some(RecipientClass::Affiliate),
            "ambassador" | "distributor" => Some(RecipientClass::Ambassador),
            "investor" => Some(RecipientClass::Investor),
            "company_expense" => Some(RecipientClass::CompanyExpense),
            _ => None,
        }
    }
}

impl fmt::Display for RecipientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reference to a policy owned by the upstream policy-management system.
///
/// `policy_type` disambiguates product lines that keep separate id spaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    pub policy_type: String,
    pub policy_id: String,
}

impl PolicyRef {
    pub fn new(policy_type: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            policy_type: policy_type.into(),
            policy_id: policy_id.into(),
        }
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.policy_type, self.policy_id)
    }
}

/// Per-class percentage overrides stored on a policy.
///
/// `None` means "no stored percentage" and falls back to the versioned
/// rate table, never to an ad-hoc constant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentageOverrides {
    pub main_agent: Option<Decimal>,
    pub affiliate: Option<Decimal>,
    pub ambassador: Option<Decimal>,
    pub investor: Option<Decimal>,
    pub company_expense: Option<Decimal>,
}

impl PercentageOverrides {
    pub fn for_class(&self, class: RecipientClass) -> Option<Decimal> {
        match class {
            RecipientClass::MainAgent => self.main_agent,
            RecipientClass::Affiliate => self.affiliate,
            RecipientClass::Ambassador => self.ambassador,
            RecipientClass::Investor => self.investor,
            RecipientClass::CompanyExpense => self.company_expense,
        }
    }
}

/// Read-only view of a policy as supplied by the upstream system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub policy: PolicyRef,
    pub premium: Decimal,
    #[serde(default)]
    pub percentages: PercentageOverrides,
    /// The agent the insurer pays commission to; always present.
    pub main_agent_id: String,
    #[serde(default)]
    pub affiliate_id: Option<String>,
    #[serde(default)]
    pub ambassador_id: Option<String>,
    #[serde(default)]
    pub investor_id: Option<String>,
    /// Referring company, billed under the company-expense class.
    #[serde(default)]
    pub company_id: Option<String>,
    /// Whether the insurer has actually paid the main-agent commission.
    /// Gates distribution for every recipient class.
    pub commission_received: bool,
}

impl PolicySnapshot {
    /// Recipient identifier for a class, if the policy has one attached.
    pub fn recipient_id(&self, class: RecipientClass) -> Option<&str> {
        match class {
            RecipientClass::MainAgent => Some(self.main_agent_id.as_str()),
            RecipientClass::Affiliate => self.affiliate_id.as_deref(),
            RecipientClass::Ambassador => self.ambassador_id.as_deref(),
            RecipientClass::Investor => self.investor_id.as_deref(),
            RecipientClass::CompanyExpense => self.company_id.as_deref(),
        }
    }
}

/// Payout lifecycle. Paid and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Cancelled,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Paid | PayoutStatus::Cancelled)
    }

    pub fn code(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One commission share owed to one recipient for one policy.
///
/// Unique on (policy, recipient_class). The amount is snapshotted from the
/// breakdown at creation and never recomputed; later edits to the policy's
/// premium or percentages affect only future payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub policy: PolicyRef,
    pub recipient_class: RecipientClass,
    pub recipient_id: String,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub transaction_id: Option<String>,
    pub settlement_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Metadata recorded when a payout is settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub date: NaiveDate,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub actor: String,
}

/// Invoice lifecycle. Issued invoices are never edited; `Voided` is reserved
/// for an administrative correction workflow outside this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Paid,
    Voided,
}

/// Monthly roll-up of paid payouts for one recipient.
///
/// Unique on (recipient_class, recipient_id, period) and on invoice_number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_number: String,
    pub recipient_class: RecipientClass,
    pub recipient_id: String,
    pub period: Period,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
}

/// What happened to a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    MarkProcessing,
    MarkPaid,
    Cancelled,
}

impl AuditAction {
    pub fn code(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::MarkProcessing => "mark_processing",
            AuditAction::MarkPaid => "mark_paid",
            AuditAction::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One append-only audit record. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub payout_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub before_state: Option<PayoutStatus>,
    pub after_state: Option<PayoutStatus>,
    pub note: Option<String>,
}
