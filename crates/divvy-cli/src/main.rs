//! Admin CLI over a file-backed ledger.
//!
//! State lives in one JSON file given by `--state`; policy snapshots for
//! distribution come from a second JSON file. Each invocation loads the
//! state, applies one operation, and flushes.

mod display;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use uuid::Uuid;

use divvy_core::{Period, PolicyRef, PolicySnapshot, RateTable, RecipientClass, Settlement};
use divvy_engine::{
    BatchItem, DistributionCoordinator, InvoiceIssuer, PayoutLedger, StaticPolicyProvider, audit,
};
use divvy_store::MemStore;

#[derive(Parser)]
#[command(name = "divvy", version, about = "Commission distribution ledger")]
struct Cli {
    /// Ledger state file (created on first use).
    #[arg(long, global = true, default_value = "divvy-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Distribute commission shares for a batch of items.
    Distribute {
        /// Policy snapshot file: a JSON array of snapshots.
        #[arg(long)]
        policies: PathBuf,
        /// Comma-separated items, each `policy_type:policy_id:class`.
        #[arg(long)]
        items: String,
        /// Settlement date (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,
        /// Bank transaction reference.
        #[arg(long)]
        tx: Option<String>,
        #[arg(long)]
        actor: String,
        /// Manual transfer amount; only valid for a single-item batch.
        #[arg(long)]
        amount: Option<Decimal>,
        /// Max in-flight items.
        #[arg(long, default_value_t = 8)]
        limit: usize,
    },

    /// Settle a single known payout.
    MarkPaid {
        payout_id: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        tx: Option<String>,
        #[arg(long)]
        actor: String,
    },

    /// Cancel a pending or processing payout.
    Cancel {
        payout_id: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: String,
    },

    /// Show the audit trail for a payout.
    Audit { payout_id: Uuid },

    /// List issued invoices.
    Invoices {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        recipient: Option<String>,
        /// Calendar month, YYYY-MM.
        #[arg(long)]
        period: Option<Period>,
    },
}

fn parse_items(raw: &str) -> anyhow::Result<Vec<BatchItem>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| {
            let mut fields = part.splitn(3, ':');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(ptype), Some(pid), Some(class)) => Ok(BatchItem {
                    policy: PolicyRef::new(ptype, pid),
                    recipient_class: RecipientClass::parse(class)
                        .with_context(|| format!("unknown recipient class {class:?}"))?,
                }),
                _ => bail!("item {part:?} is not policy_type:policy_id:class"),
            }
        })
        .collect()
}

fn load_policies(path: &PathBuf) -> anyhow::Result<Vec<PolicySnapshot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading policy file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing policy file {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::debug!("divvy v{}", env!("CARGO_PKG_VERSION"));
    let cli = Cli::parse();

    let store = Arc::new(MemStore::open_persistent(&cli.state)?);
    let ledger = PayoutLedger::new(Arc::clone(&store), RateTable::current());
    let issuer = InvoiceIssuer::new(Arc::clone(&store));

    match cli.command {
        Command::Distribute {
            policies,
            items,
            date,
            tx,
            actor,
            amount,
            limit,
        } => {
            let items = parse_items(&items)?;
            if items.is_empty() {
                bail!("no items to distribute");
            }
            let provider = Arc::new(StaticPolicyProvider::new(load_policies(&policies)?));
            let coordinator = DistributionCoordinator::new(ledger, issuer, provider)
                .with_concurrency(limit);
            let settlement = Settlement {
                date,
                transaction_id: tx,
                notes: None,
                actor,
            };

            if let Some(amount) = amount {
                let [item] = items.as_slice() else {
                    bail!("--amount requires exactly one item");
                };
                let receipt = coordinator
                    .distribute_adhoc(&item.policy, item.recipient_class, amount, &settlement)
                    .await?;
                display::print_receipt(&receipt);
            } else {
                let result = coordinator.distribute(items, &settlement).await;
                display::print_batch_result(&result);
                if !result.failed.is_empty() {
                    std::process::exit(1);
                }
            }
        }

        Command::MarkPaid {
            payout_id,
            date,
            tx,
            actor,
        } => {
            let settlement = Settlement {
                date,
                transaction_id: tx,
                notes: None,
                actor,
            };
            let outcome = ledger.mark_paid(payout_id, &settlement)?;
            display::print_payout(&outcome.payout, outcome.already_paid);
            let payout = outcome.payout;
            let period = payout.settlement_date.map(Period::from_date);
            if let Some(period) = period {
                issuer.issue_if_due(payout.recipient_class, &payout.recipient_id, period)?;
            }
        }

        Command::Cancel {
            payout_id,
            reason,
            actor,
        } => {
            let payout = ledger.cancel(payout_id, &reason, &actor)?;
            display::print_payout(&payout, false);
        }

        Command::Audit { payout_id } => {
            let trail = audit::audit_trail(&store, payout_id);
            if trail.is_empty() {
                bail!("no audit entries for payout {payout_id}");
            }
            display::print_audit_trail(payout_id, &trail);
        }

        Command::Invoices {
            class,
            recipient,
            period,
        } => {
            let class = class
                .as_deref()
                .map(|c| {
                    RecipientClass::parse(c)
                        .with_context(|| format!("unknown recipient class {c:?}"))
                })
                .transpose()?;
            let invoices = issuer.find_invoices(class, recipient.as_deref(), period);
            display::print_invoices(&invoices);
        }
    }

    Ok(())
}
