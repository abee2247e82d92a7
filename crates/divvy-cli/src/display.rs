//! Human-readable rendering for payouts, batch results, audit trails,
//! and invoice listings.

use uuid::Uuid;

use divvy_core::{AuditLogEntry, Invoice, Payout};
use divvy_engine::{BatchResult, DistributionReceipt};

// ── Payouts ──

pub fn print_payout(payout: &Payout, already_paid: bool) {
    println!("=== payout {} ===", payout.id);
    println!("  {:<18} {}", "policy", payout.policy);
    println!("  {:<18} {}", "class", payout.recipient_class);
    println!("  {:<18} {}", "recipient", payout.recipient_id);
    println!("  {:<18} {}", "amount", payout.amount);
    println!("  {:<18} {}", "status", payout.status);
    if let Some(date) = payout.settlement_date {
        println!("  {:<18} {}", "settlement date", date);
    }
    if let Some(tx) = &payout.transaction_id {
        println!("  {:<18} {}", "transaction", tx);
    }
    if let Some(by) = &payout.processed_by {
        println!("  {:<18} {}", "processed by", by);
    }
    if let Some(notes) = &payout.notes {
        println!("  {:<18} {}", "notes", notes);
    }
    if already_paid {
        println!("  (already settled; no new transition recorded)");
    }
}

pub fn print_receipt(receipt: &DistributionReceipt) {
    print_payout(&receipt.payout, receipt.already_paid);
}

// ── Batch results ──

pub fn print_batch_result(result: &BatchResult) {
    for receipt in &result.succeeded {
        let marker = if receipt.already_paid { "=" } else { "+" };
        println!(
            "{} {:<32} {:<12} {:>12}  payout {}",
            marker,
            receipt.item.policy.to_string(),
            receipt.item.recipient_class.to_string(),
            receipt.payout.amount,
            receipt.payout.id,
        );
    }
    for failed in &result.failed {
        println!(
            "! {:<32} {:<12} {}",
            failed.item.policy.to_string(),
            failed.item.recipient_class.to_string(),
            failed.reason,
        );
    }
    println!();
    println!(
        "{} succeeded, {} failed",
        result.succeeded.len(),
        result.failed.len()
    );
    if !result.invoices.is_empty() {
        println!();
        println!("invoices issued:");
        for invoice in &result.invoices {
            print_invoice_line(invoice);
        }
    }
}

// ── Audit trails ──

pub fn print_audit_trail(payout_id: Uuid, trail: &[AuditLogEntry]) {
    println!("=== audit trail for payout {payout_id} ===");
    for entry in trail {
        let transition = match (entry.before_state, entry.after_state) {
            (Some(from), Some(to)) => format!("{from} -> {to}"),
            (None, Some(to)) => format!("-> {to}"),
            _ => String::new(),
        };
        print!(
            "  {}  {:<16} {:<24} by {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            transition,
            entry.actor,
        );
        if let Some(note) = &entry.note {
            print!("  ({note})");
        }
        println!();
    }
}

// ── Invoices ──

pub fn print_invoices(invoices: &[Invoice]) {
    if invoices.is_empty() {
        println!("no invoices match");
        return;
    }
    for invoice in invoices {
        print_invoice_line(invoice);
    }
}

fn print_invoice_line(invoice: &Invoice) {
    println!(
        "  {:<28} {:<12} {:<20} {}  {:>12}",
        invoice.invoice_number,
        invoice.recipient_class.to_string(),
        invoice.recipient_id,
        invoice.period,
        invoice.total_amount,
    );
}
