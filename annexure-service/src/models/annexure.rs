//! Annexure and file-group models for annexure-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A named batch of LRs pending invoicing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Annexure {
    pub annexure_id: Uuid,
    pub name: String,
    pub from_date: NaiveDate,
    pub vendor_id: Option<Uuid>,
    pub is_invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Annexure {
    /// Historical annexures accept no membership changes.
    pub fn is_closed(&self) -> bool {
        self.is_invoiced || self.invoice_id.is_some()
    }
}

/// Input for creating an annexure.
#[derive(Debug, Clone, Validate)]
pub struct NewAnnexure {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    pub from_date: NaiveDate,
    pub vendor_id: Option<Uuid>,
}

/// All LRs sharing one file number inside one annexure.
///
/// `total_price` and `extra_cost` are derived from the members on every
/// membership change and are never accepted as inputs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnnexureFileGroup {
    pub group_id: Uuid,
    pub annexure_id: Uuid,
    pub file_number: String,
    pub total_price: Decimal,
    pub extra_cost: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Filter parameters for listing annexures.
#[derive(Debug, Clone, Default)]
pub struct ListAnnexuresFilter {
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
