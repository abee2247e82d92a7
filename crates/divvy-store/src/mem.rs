//! In-process store with optional JSON-file persistence.
//!
//! Every mutation is a single atomic conditional write under the store
//! mutex: insert-if-absent guarded by a composite unique key, or a status
//! compare-and-swap on one payout row. Nothing in here blocks on anything
//! except the state file flush.
//!
//! Supports both in-memory (ephemeral) and persistent (file-backed) modes.
//! Use [`MemStore::open`] for in-memory and [`MemStore::open_persistent`]
//! for a state file that survives across process restarts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use divvy_core::{
    AuditLogEntry, Invoice, Payout, PayoutStatus, Period, PolicyRef, RecipientClass,
};

use crate::StoreError;

/// Result of an insert guarded by the payout unique key.
#[derive(Debug, Clone)]
pub enum PayoutInsert {
    Created(Payout),
    /// A row for (policy, recipient_class) already exists; it is returned
    /// unchanged and the candidate row is discarded.
    Existing(Payout),
}

/// Result of a payout status compare-and-swap.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The transition was applied by this call.
    Applied {
        payout: Payout,
        previous: PayoutStatus,
    },
    /// The row was already in the target status; nothing was written.
    AlreadyThere(Payout),
    /// The current status is not in the allowed-from set; nothing was written.
    Refused { current: PayoutStatus },
}

/// Result of an insert guarded by the invoice unique keys.
#[derive(Debug, Clone)]
pub enum InvoiceInsert {
    Created(Invoice),
    /// An invoice for (recipient_class, recipient_id, period) already exists.
    ExistingKey(Invoice),
    /// The invoice number is taken by a different recipient/period.
    NumberTaken,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    payouts: HashMap<Uuid, Payout>,
    /// (policy_type, policy_id, recipient_class) → payout id.
    payout_keys: HashMap<String, Uuid>,
    /// (recipient_class, recipient_id, period) → invoice.
    invoices: HashMap<String, Invoice>,
    invoice_numbers: HashSet<String>,
    audit: Vec<AuditLogEntry>,
    invoice_seq: u64,
}

fn payout_key(policy: &PolicyRef, class: RecipientClass) -> String {
    format!("{}|{}|{}", policy.policy_type, policy.policy_id, class.code())
}

fn invoice_key(class: RecipientClass, recipient_id: &str, period: Period) -> String {
    format!("{}|{}|{}", class.code(), recipient_id, period)
}

/// Payout/invoice/audit store guarded by one mutex.
///
/// The mutex makes each method call an atomic unit, which is exactly the
/// conditional-write contract the engine needs; no lock is held across
/// method boundaries.
pub struct MemStore {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
}

impl MemStore {
    /// Open an ephemeral in-memory store.
    pub fn open() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            path: None,
        }
    }

    /// Open or create a file-backed store at the given path.
    ///
    /// If the file exists its tables are loaded; every later mutation is
    /// flushed back to the same file.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let tables = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let tables: Tables = serde_json::from_str(&data)?;
            info!(
                path = %path.display(),
                payouts = tables.payouts.len(),
                invoices = tables.invoices.len(),
                "loaded state file"
            );
            tables
        } else {
            Tables::default()
        };
        Ok(Self {
            tables: Mutex::new(tables),
            path: Some(path.to_path_buf()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the tables snapshot to the state file.
    ///
    /// Memory is authoritative: if the write fails, the in-memory mutation
    /// stands and the caller sees the I/O error. The next successful flush
    /// writes the full snapshot, including the change that failed to land.
    fn flush(&self, tables: &Tables) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let data = serde_json::to_string_pretty(tables)?;
            std::fs::write(path, data)?;
        }
        Ok(())
    }

    // ── Payouts ──

    /// Insert a payout unless a row for its unique key already exists.
    ///
    /// On `Created`, `audit` is appended inside the same critical section as
    /// the insert, so the payout's trail starts with its creation entry
    /// before any transition on the row can be recorded. On `Existing` the
    /// entry is discarded.
    pub fn insert_payout_if_absent(
        &self,
        payout: Payout,
        audit: AuditLogEntry,
    ) -> Result<PayoutInsert, StoreError> {
        let mut tables = self.lock();
        let key = payout_key(&payout.policy, payout.recipient_class);
        if let Some(&existing_id) = tables.payout_keys.get(&key) {
            let existing = tables
                .payouts
                .get(&existing_id)
                .cloned()
                .ok_or(StoreError::DanglingPayoutKey {
                    key,
                    id: existing_id,
                })?;
            return Ok(PayoutInsert::Existing(existing));
        }
        tables.payout_keys.insert(key, payout.id);
        tables.payouts.insert(payout.id, payout.clone());
        tables.audit.push(audit);
        self.flush(&tables)?;
        Ok(PayoutInsert::Created(payout))
    }

    /// Fetch a payout by id.
    pub fn payout(&self, id: Uuid) -> Result<Payout, StoreError> {
        self.lock()
            .payouts
            .get(&id)
            .cloned()
            .ok_or(StoreError::PayoutNotFound(id))
    }

    /// Conditionally move a payout to `target`.
    ///
    /// The whole check-and-write happens under the store mutex, so two
    /// concurrent calls for the same row resolve to exactly one `Applied`;
    /// the loser sees `AlreadyThere`. `mutate` runs only on the winning
    /// write, after the status has been set. The winning write also appends
    /// the entry built by `audit` (from the previous status) before the lock
    /// is released, so a payout's trail lists transitions in exactly the
    /// order they were applied.
    pub fn cas_payout_status<F, A>(
        &self,
        id: Uuid,
        allowed_from: &[PayoutStatus],
        target: PayoutStatus,
        mutate: F,
        audit: A,
    ) -> Result<CasOutcome, StoreError>
    where
        F: FnOnce(&mut Payout),
        A: FnOnce(PayoutStatus) -> AuditLogEntry,
    {
        let mut tables = self.lock();
        let Some(payout) = tables.payouts.get_mut(&id) else {
            return Err(StoreError::PayoutNotFound(id));
        };
        if payout.status == target {
            return Ok(CasOutcome::AlreadyThere(payout.clone()));
        }
        if !allowed_from.contains(&payout.status) {
            return Ok(CasOutcome::Refused {
                current: payout.status,
            });
        }
        let previous = payout.status;
        payout.status = target;
        mutate(payout);
        let updated = payout.clone();
        tables.audit.push(audit(previous));
        self.flush(&tables)?;
        Ok(CasOutcome::Applied {
            payout: updated,
            previous,
        })
    }

    /// All payouts for a policy, ordered by recipient class.
    pub fn payouts_for_policy(&self, policy: &PolicyRef) -> Vec<Payout> {
        let tables = self.lock();
        let mut found: Vec<Payout> = tables
            .payouts
            .values()
            .filter(|p| &p.policy == policy)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.recipient_class);
        found
    }

    /// All payouts owed to one recipient, oldest first.
    pub fn payouts_for_recipient(&self, class: RecipientClass, recipient_id: &str) -> Vec<Payout> {
        let mut found: Vec<Payout> = self
            .lock()
            .payouts
            .values()
            .filter(|p| p.recipient_class == class && p.recipient_id == recipient_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.created_at);
        found
    }

    /// Paid payouts for a recipient whose settlement date falls in `period`.
    pub fn paid_payouts_in_period(
        &self,
        class: RecipientClass,
        recipient_id: &str,
        period: Period,
    ) -> Vec<Payout> {
        self.lock()
            .payouts
            .values()
            .filter(|p| {
                p.status == PayoutStatus::Paid
                    && p.recipient_class == class
                    && p.recipient_id == recipient_id
                    && p.settlement_date.is_some_and(|d| period.contains(d))
            })
            .cloned()
            .collect()
    }

    // ── Invoices ──

    /// Insert an invoice unless either unique key is taken.
    ///
    /// The recipient-key check and the number check happen under the same
    /// lock as the write, so a lost race surfaces as `ExistingKey` (with the
    /// winning row) or `NumberTaken`, never as a partial write.
    pub fn insert_invoice_if_absent(&self, invoice: Invoice) -> Result<InvoiceInsert, StoreError> {
        let mut tables = self.lock();
        let key = invoice_key(invoice.recipient_class, &invoice.recipient_id, invoice.period);
        if let Some(existing) = tables.invoices.get(&key) {
            return Ok(InvoiceInsert::ExistingKey(existing.clone()));
        }
        if tables.invoice_numbers.contains(&invoice.invoice_number) {
            return Ok(InvoiceInsert::NumberTaken);
        }
        tables.invoice_numbers.insert(invoice.invoice_number.clone());
        tables.invoices.insert(key, invoice.clone());
        self.flush(&tables)?;
        Ok(InvoiceInsert::Created(invoice))
    }

    /// Fetch the invoice for a recipient key, if issued.
    pub fn invoice_for(
        &self,
        class: RecipientClass,
        recipient_id: &str,
        period: Period,
    ) -> Option<Invoice> {
        self.lock()
            .invoices
            .get(&invoice_key(class, recipient_id, period))
            .cloned()
    }

    /// Invoices matching the given filters, newest period first.
    pub fn invoices(
        &self,
        class: Option<RecipientClass>,
        recipient_id: Option<&str>,
        period: Option<Period>,
    ) -> Vec<Invoice> {
        let mut found: Vec<Invoice> = self
            .lock()
            .invoices
            .values()
            .filter(|inv| {
                class.is_none_or(|c| inv.recipient_class == c)
                    && recipient_id.is_none_or(|r| inv.recipient_id == r)
                    && period.is_none_or(|p| inv.period == p)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.period
                .cmp(&a.period)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        found
    }

    /// Next value of the monotonic invoice sequence (for fallback numbers).
    pub fn next_invoice_sequence(&self) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        tables.invoice_seq += 1;
        let seq = tables.invoice_seq;
        self.flush(&tables)?;
        Ok(seq)
    }

    // ── Audit ──

    /// Append an audit entry. Entries are never updated or deleted.
    pub fn append_audit(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.audit.push(entry);
        self.flush(&tables)?;
        Ok(())
    }

    /// Audit entries for one payout, in append order.
    pub fn audit_for_payout(&self, payout_id: Uuid) -> Vec<AuditLogEntry> {
        self.lock()
            .audit
            .iter()
            .filter(|e| e.payout_id == payout_id)
            .cloned()
            .collect()
    }

    /// Audit entries for a set of payouts, in append order.
    pub fn audit_for_payouts(&self, payout_ids: &[Uuid]) -> Vec<AuditLogEntry> {
        self.lock()
            .audit
            .iter()
            .filter(|e| payout_ids.contains(&e.payout_id))
            .cloned()
            .collect()
    }

    // ── Counts ──

    pub fn payout_count(&self) -> usize {
        self.lock().payouts.len()
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().invoices.len()
    }

    pub fn audit_count(&self) -> usize {
        self.lock().audit.len()
    }
}
