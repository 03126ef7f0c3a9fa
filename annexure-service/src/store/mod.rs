//! Ledger Store: persistent state for LRs, annexures, file groups and invoices.
//!
//! Engines only talk to the repository traits. Every membership write is
//! conditional so that concurrent requests cannot double-link or
//! double-invoice an LR; the implementations differ only in where the
//! rows live.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use crate::models::{
    Annexure, AnnexureFileGroup, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus,
    ListAnnexuresFilter, LrRequest, NewAnnexure, NewLrRequest,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait LrRepository: Send + Sync {
    /// Insert a new LR. The number must already be normalised.
    async fn insert_lr(&self, lr: &NewLrRequest) -> Result<LrRequest, AppError>;

    async fn find_lr_by_number(&self, lr_number: &str) -> Result<Option<LrRequest>, AppError>;

    async fn find_lrs_by_numbers(&self, lr_numbers: &[String]) -> Result<Vec<LrRequest>, AppError>;

    /// All LRs carrying `file_number`, ordered by LR number.
    async fn find_lrs_by_file(&self, file_number: &str) -> Result<Vec<LrRequest>, AppError>;

    /// Members of an annexure, ordered by file number then LR number.
    async fn find_lrs_by_annexure(&self, annexure_id: Uuid) -> Result<Vec<LrRequest>, AppError>;

    async fn find_lrs_by_group(&self, group_id: Uuid) -> Result<Vec<LrRequest>, AppError>;

    async fn count_lrs_in_annexure_file(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<u64, AppError>;

    /// Set the POD URL of an unlocked LR. `None` if the LR is missing or locked.
    async fn set_podlink(&self, lr_id: Uuid, podlink: &str) -> Result<Option<LrRequest>, AppError>;

    /// Link an LR to an annexure and group, only if it is still unlinked
    /// and unlocked. Returns whether the row was updated.
    async fn link_lr(&self, lr_id: Uuid, annexure_id: Uuid, group_id: Uuid)
        -> Result<bool, AppError>;

    async fn unlink_lr(&self, lr_id: Uuid) -> Result<u64, AppError>;

    async fn unlink_file(&self, annexure_id: Uuid, file_number: &str) -> Result<u64, AppError>;

    async fn unlink_group(&self, group_id: Uuid) -> Result<u64, AppError>;

    async fn unlink_annexure(&self, annexure_id: Uuid) -> Result<u64, AppError>;
}

#[async_trait]
pub trait AnnexureRepository: Send + Sync {
    async fn create_annexure(&self, annexure: &NewAnnexure) -> Result<Annexure, AppError>;

    async fn get_annexure(&self, annexure_id: Uuid) -> Result<Option<Annexure>, AppError>;

    /// Page of annexures ordered by id, starting after `filter.page_token`.
    /// Returns the page and the cursor for the next one.
    async fn list_annexures(
        &self,
        filter: &ListAnnexuresFilter,
    ) -> Result<(Vec<Annexure>, Option<Uuid>), AppError>;

    /// Set the vendor only if the annexure has none yet.
    async fn adopt_vendor(&self, annexure_id: Uuid, vendor_id: Uuid) -> Result<bool, AppError>;

    async fn delete_annexure(&self, annexure_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait FileGroupRepository: Send + Sync {
    /// Atomic insert-or-get keyed on `(annexure_id, file_number)`.
    /// The flag is true when this call created the row.
    async fn insert_or_get_group(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<(AnnexureFileGroup, bool), AppError>;

    async fn get_group(&self, group_id: Uuid) -> Result<Option<AnnexureFileGroup>, AppError>;

    async fn list_groups(&self, annexure_id: Uuid) -> Result<Vec<AnnexureFileGroup>, AppError>;

    /// Recompute `total_price` and `extra_cost` from the current members.
    async fn refresh_group_totals(
        &self,
        group_id: Uuid,
    ) -> Result<Option<AnnexureFileGroup>, AppError>;

    /// Delete the group if no LR references it.
    async fn delete_group_if_empty(&self, group_id: Uuid) -> Result<bool, AppError>;

    async fn delete_empty_groups(&self, annexure_id: Uuid) -> Result<u64, AppError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Persist invoices, their items and LR links in one transaction.
    ///
    /// LR links are conditional on the LR still being uninvoiced and still
    /// belonging to the draft's annexure (none for file invoices); if any
    /// link misses, nothing is written and `Conflict` is returned. Drafts
    /// carrying an `annexure_id` close that annexure in the same write.
    async fn create_invoices(&self, drafts: &[InvoiceDraft]) -> Result<Vec<Invoice>, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError>;

    /// Move the invoice from `from` to `to`. `None` if it is no longer in `from`.
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError>;
}

/// A complete backend for all four repositories.
#[async_trait]
pub trait LedgerStore:
    LrRepository + AnnexureRepository + FileGroupRepository + InvoiceRepository
{
    async fn health_check(&self) -> Result<(), AppError>;
}

pub type SharedStore = Arc<dyn LedgerStore>;

pub(crate) fn clamp_page_size(page_size: i32) -> i64 {
    page_size.clamp(1, 100) as i64
}
