//! Invoice model for annexure-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
///
/// `Draft -> Submitted -> Approved -> Paid`, and `Submitted -> Rejected`.
/// `Paid` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Submitted,
    Approved,
    Paid,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Submitted => "submitted",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "submitted" => InvoiceStatus::Submitted,
            "approved" => InvoiceStatus::Approved,
            "paid" => InvoiceStatus::Paid,
            "rejected" => InvoiceStatus::Rejected,
            _ => InvoiceStatus::Draft,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Submitted)
                | (InvoiceStatus::Submitted, InvoiceStatus::Approved)
                | (InvoiceStatus::Submitted, InvoiceStatus::Rejected)
                | (InvoiceStatus::Approved, InvoiceStatus::Paid)
        )
    }
}

/// Invoice document. Linked LRs reference it through `lr_requests.invoice_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub vendor_id: Uuid,
    pub annexure_id: Option<Uuid>,
    pub status: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Line item on an invoice, one per LR.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub lr_id: Uuid,
    pub lr_number: String,
    pub file_number: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub extra_cost: Decimal,
    pub total: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// A fully priced invoice ready to be persisted together with its LR links.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub invoice_number: String,
    pub vendor_id: Uuid,
    /// Set by the annexure path only; the annexure is closed in the same write.
    pub annexure_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
    pub items: Vec<InvoiceItemDraft>,
}

impl InvoiceDraft {
    pub fn lr_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.lr_id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceItemDraft {
    pub lr_id: Uuid,
    pub lr_number: String,
    pub file_number: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub extra_cost: Decimal,
    pub total: Decimal,
    pub sort_order: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Submitted,
            InvoiceStatus::Approved,
            InvoiceStatus::Paid,
            InvoiceStatus::Rejected,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn only_forward_transitions_are_allowed() {
        assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Submitted));
        assert!(InvoiceStatus::Submitted.can_transition_to(InvoiceStatus::Rejected));
        assert!(InvoiceStatus::Approved.can_transition_to(InvoiceStatus::Paid));
        assert!(!InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Paid));
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Draft));
        assert!(!InvoiceStatus::Rejected.can_transition_to(InvoiceStatus::Submitted));
    }

    #[test]
    fn terminal_states() {
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(InvoiceStatus::Rejected.is_terminal());
        assert!(!InvoiceStatus::Approved.is_terminal());
    }
}
