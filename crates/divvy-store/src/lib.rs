//! Storage layer: payout, invoice, and audit tables with per-key atomic
//! conditional writes.

mod error;
pub use error::StoreError;

mod mem;
pub use mem::{CasOutcome, InvoiceInsert, MemStore, PayoutInsert};
