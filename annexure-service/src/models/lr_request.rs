//! Lorry receipt model for annexure-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Canonical form of an LR number: trimmed and upper-cased.
pub fn normalize_lr_number(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// One shipment / lorry receipt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LrRequest {
    pub lr_id: Uuid,
    pub lr_number: String,
    pub file_number: Option<String>,
    pub vendor_id: Uuid,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub remark: Option<String>,
    pub podlink: Option<String>,
    pub lr_price: Option<Decimal>,
    pub price_settled: Option<Decimal>,
    pub extra_cost: Decimal,
    pub is_invoiced: bool,
    pub annexure_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LrRequest {
    /// Invoiced LRs can no longer join, leave or change annexures.
    pub fn is_locked(&self) -> bool {
        self.is_invoiced || self.invoice_id.is_some()
    }

    pub fn has_pod(&self) -> bool {
        self.podlink
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }

    /// File number, if one is assigned and not blank.
    pub fn file(&self) -> Option<&str> {
        self.file_number
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Settled price, falling back to the quoted LR price, then zero.
    pub fn billable_price(&self) -> Decimal {
        self.price_settled
            .or(self.lr_price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn billed_amount(&self) -> Decimal {
        self.billable_price() + self.extra_cost
    }
}

/// Input for recording a new LR submitted by a vendor.
#[derive(Debug, Clone, Validate)]
pub struct NewLrRequest {
    #[validate(length(min = 1, max = 64, message = "lr_number must be 1-64 characters"))]
    pub lr_number: String,
    #[validate(length(min = 1, max = 64, message = "file_number must be 1-64 characters"))]
    pub file_number: Option<String>,
    pub vendor_id: Uuid,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub remark: Option<String>,
    #[validate(url(message = "podlink must be a URL"))]
    pub podlink: Option<String>,
    pub lr_price: Option<Decimal>,
    pub price_settled: Option<Decimal>,
    pub extra_cost: Decimal,
}

/// Input for recording the POD URL returned by blob storage.
#[derive(Debug, Clone, Validate)]
pub struct AttachPod {
    #[validate(length(min = 1, message = "lr_number is required"))]
    pub lr_number: String,
    #[validate(url(message = "podlink must be a URL"))]
    pub podlink: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lr() -> LrRequest {
        let now = Utc::now();
        LrRequest {
            lr_id: Uuid::new_v4(),
            lr_number: "LR001".to_string(),
            file_number: Some(" F-10 ".to_string()),
            vendor_id: Uuid::new_v4(),
            origin: None,
            destination: None,
            remark: None,
            podlink: Some("   ".to_string()),
            lr_price: Some(Decimal::new(1000, 0)),
            price_settled: None,
            extra_cost: Decimal::new(50, 0),
            is_invoiced: false,
            annexure_id: None,
            group_id: None,
            invoice_id: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_lr_number("  lr001\t"), "LR001");
    }

    #[test]
    fn blank_podlink_is_not_a_pod() {
        assert!(!lr().has_pod());
    }

    #[test]
    fn file_is_trimmed() {
        assert_eq!(lr().file(), Some("F-10"));
    }

    #[test]
    fn billable_price_prefers_settled() {
        let mut lr = lr();
        assert_eq!(lr.billable_price(), Decimal::new(1000, 0));
        lr.price_settled = Some(Decimal::new(900, 0));
        assert_eq!(lr.billable_price(), Decimal::new(900, 0));
        assert_eq!(lr.billed_amount(), Decimal::new(950, 0));
    }

    #[test]
    fn invoice_link_alone_locks() {
        let mut lr = lr();
        assert!(!lr.is_locked());
        lr.invoice_id = Some(Uuid::new_v4());
        assert!(lr.is_locked());
    }
}
