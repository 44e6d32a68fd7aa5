//! Derived-state reconciliation for invoices.
//!
//! Overdue is never a stored fact of its own: it is recomputed from the
//! stored status and due date on every read, and any observed transition
//! is written back so storage never drifts from policy. The computation is
//! pure; persistence is a separate, explicit step.

use chrono::NaiveDate;
use color_eyre::Result;

use crate::model::{Invoice, InvoiceStatus};
use crate::store::RecordStore;

/// Effective status per the overdue policy: an unpaid or partially paid
/// invoice whose due date (date-only, local calendar day) is strictly
/// before today is overdue. Idempotent: feeding an already-overdue record
/// back in yields the same status.
pub fn effective_status(
  status: InvoiceStatus,
  due_date: Option<NaiveDate>,
  today: NaiveDate,
) -> InvoiceStatus {
  match (status, due_date) {
    (InvoiceStatus::Unpaid | InvoiceStatus::Partial, Some(due)) if due < today => {
      InvoiceStatus::Overdue
    }
    (status, _) => status,
  }
}

/// Recompute the invoice's status in place. Returns whether it changed.
/// No I/O; the caller decides whether to persist.
pub fn apply(invoice: &mut Invoice, today: NaiveDate) -> bool {
  let effective = effective_status(invoice.status, invoice.due_date, today);
  if effective == invoice.status {
    return false;
  }
  invoice.status = effective;
  true
}

/// Reconcile one invoice and persist the correction if it changed.
///
/// The write-back stamps `updated_at` like any other mutation, so the
/// correction propagates through the sync shadow downstream.
pub fn reconcile_and_persist(
  store: &RecordStore,
  mut invoice: Invoice,
  today: NaiveDate,
) -> Result<(Invoice, bool)> {
  let changed = apply(&mut invoice, today);
  if changed {
    store.save(&mut invoice)?;
  }
  Ok((invoice, changed))
}
