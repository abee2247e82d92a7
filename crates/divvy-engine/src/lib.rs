//! Distribution engine: payout ledger state machine, batch coordinator,
//! idempotent invoice issuer, and audit timelines.

pub mod audit;
pub mod coordinator;
mod error;
pub mod invoice;
pub mod ledger;

pub use audit::TimelineEvent;
pub use coordinator::{
    BatchItem, BatchResult, DistributionCoordinator, DistributionReceipt, FailedItem,
    PolicyProvider, StaticPolicyProvider,
};
pub use error::EngineError;
pub use invoice::{InvoiceIssuer, IssueOutcome};
pub use ledger::{MarkPaidOutcome, PayoutLedger};
