pub mod breakdown;
pub mod money;
pub mod period;
pub mod rates;
pub mod types;

pub use breakdown::{CommissionBreakdown, CommissionShare, breakdown};
pub use period::Period;
pub use rates::RateTable;
pub use types::{
    AuditAction, AuditLogEntry, Invoice, InvoiceStatus, Payout, PayoutStatus, PercentageOverrides,
    PolicyRef, PolicySnapshot, RecipientClass, Settlement,
};
