//! Invoice generation from an annexure or from a list of file numbers.

use crate::config::InvoicingConfig;
use crate::models::{
    Invoice, InvoiceDraft, InvoiceItem, InvoiceItemDraft, InvoiceStatus, LrRequest,
};
use crate::services::metrics::record_invoices_generated;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

#[derive(Clone)]
pub struct InvoiceEngine {
    store: SharedStore,
    config: InvoicingConfig,
}

impl InvoiceEngine {
    pub fn new(store: SharedStore, config: InvoicingConfig) -> Self {
        Self { store, config }
    }

    /// One invoice covering every LR of the annexure. Closes the annexure.
    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn generate_from_annexure(&self, annexure_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let annexure = self
            .store
            .get_annexure(annexure_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Annexure not found")))?;
        if annexure.is_closed() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Annexure already invoiced"
            )));
        }

        let mut members = self.store.find_lrs_by_annexure(annexure_id).await?;
        if members.is_empty() {
            return Err(AppError::InvalidState(anyhow::anyhow!("Annexure has no LRs")));
        }

        let groups: HashMap<Uuid, String> = self
            .store
            .list_groups(annexure_id)
            .await?
            .into_iter()
            .map(|g| (g.group_id, g.file_number))
            .collect();
        let consistent = members.iter().all(|lr| {
            lr.group_id
                .and_then(|id| groups.get(&id))
                .map(|file| lr.file() == Some(file.as_str()))
                .unwrap_or(false)
        });
        if !consistent {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Annexure file groups are inconsistent with their LRs"
            )));
        }

        ensure_unlocked(&members)?;
        ensure_pods(&members)?;

        let vendors: HashSet<Uuid> = members.iter().map(|lr| lr.vendor_id).collect();
        if vendors.len() > 1 {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Annexure spans multiple vendors"
            )));
        }
        let vendor_id = members[0].vendor_id;

        sort_members(&mut members);
        let lowest_file = file_of(&members[0]);
        let now = Utc::now();
        let mut draft = self.draft(&lowest_file, vendor_id, &members, now);
        draft.annexure_id = Some(annexure_id);

        let invoice = self
            .store
            .create_invoices(std::slice::from_ref(&draft))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("No invoice persisted")))?;

        record_invoices_generated("annexure", 1);
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            items = members.len(),
            grand_total = %invoice.grand_total,
            "Invoice generated from annexure"
        );

        self.detail(invoice).await
    }

    /// One invoice per distinct file number, all written in one transaction.
    #[instrument(skip(self, file_numbers), fields(vendor_id = %vendor_id, files = file_numbers.len()))]
    pub async fn generate_from_files(
        &self,
        vendor_id: Uuid,
        file_numbers: &[String],
    ) -> Result<Vec<InvoiceDetail>, AppError> {
        if vendor_id.is_nil() {
            return Err(AppError::BadRequest(anyhow::anyhow!("vendor_id is required")));
        }

        let mut files: Vec<String> = Vec::new();
        for file in file_numbers.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            if !files.iter().any(|f| f == file) {
                files.push(file.to_string());
            }
        }
        if files.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "file_numbers must not be empty"
            )));
        }

        let mut per_file = Vec::with_capacity(files.len());
        for file in &files {
            let members: Vec<LrRequest> = self
                .store
                .find_lrs_by_file(file)
                .await?
                .into_iter()
                .filter(|lr| lr.vendor_id == vendor_id)
                .collect();
            if members.is_empty() {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "No LRs found for file {}",
                    file
                )));
            }
            per_file.push((file.clone(), members));
        }

        let all: Vec<LrRequest> = per_file
            .iter()
            .flat_map(|(_, members)| members.iter().cloned())
            .collect();
        ensure_unlocked(&all)?;
        self.ensure_unannexured(&all).await?;
        ensure_pods(&all)?;

        let now = Utc::now();
        let drafts: Vec<InvoiceDraft> = per_file
            .iter_mut()
            .map(|(file, members)| {
                sort_members(members);
                self.draft(file, vendor_id, members, now)
            })
            .collect();

        let invoices = self.store.create_invoices(&drafts).await?;

        record_invoices_generated("files", invoices.len());
        info!(invoices = invoices.len(), "Invoices generated from files");

        let mut details = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            details.push(self.detail(invoice).await?);
        }
        Ok(details)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        self.detail(invoice).await
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id, status = next.as_str()))]
    pub async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        next: InvoiceStatus,
    ) -> Result<InvoiceDetail, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let current = invoice.status();
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Cannot move invoice from {} to {}",
                current.as_str(),
                next.as_str()
            )));
        }

        let updated = self
            .store
            .update_invoice_status(invoice_id, current, next)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Invoice status changed concurrently"))
            })?;

        info!(from = current.as_str(), to = next.as_str(), "Invoice status updated");
        self.detail(updated).await
    }

    /// Files still held by an annexure are billed through that annexure.
    async fn ensure_unannexured(&self, members: &[LrRequest]) -> Result<(), AppError> {
        let Some((lr, annexure_id)) = members
            .iter()
            .find_map(|lr| lr.annexure_id.map(|id| (lr, id)))
        else {
            return Ok(());
        };
        let name = self
            .store
            .get_annexure(annexure_id)
            .await?
            .map(|a| a.name)
            .unwrap_or_else(|| annexure_id.to_string());
        Err(AppError::Conflict(anyhow::anyhow!(
            "file {} belongs to annexure {}",
            file_of(lr),
            name
        )))
    }

    async fn detail(&self, invoice: Invoice) -> Result<InvoiceDetail, AppError> {
        let items = self.store.invoice_items(invoice.invoice_id).await?;
        Ok(InvoiceDetail { invoice, items })
    }

    fn draft(
        &self,
        file_number: &str,
        vendor_id: Uuid,
        members: &[LrRequest],
        at: DateTime<Utc>,
    ) -> InvoiceDraft {
        let items: Vec<InvoiceItemDraft> = members
            .iter()
            .enumerate()
            .map(|(i, lr)| line_item(lr, i as i32))
            .collect();
        let (subtotal, tax_amount, grand_total) =
            totals(items.iter().map(|i| i.total), self.config.tax_rate);

        InvoiceDraft {
            invoice_number: invoice_number(&self.config.number_prefix, at, file_number),
            vendor_id,
            annexure_id: None,
            subtotal,
            tax_amount,
            grand_total,
            items,
        }
    }
}

/// `{prefix}-{YYYYMMDDHHMMSSmmm}-{file_number}`
pub fn invoice_number(prefix: &str, at: DateTime<Utc>, file_number: &str) -> String {
    format!("{}-{}-{}", prefix, at.format("%Y%m%d%H%M%S%3f"), file_number)
}

/// Subtotal, tax rounded to two places, and grand total.
pub fn totals(
    item_totals: impl IntoIterator<Item = Decimal>,
    tax_rate: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let subtotal: Decimal = item_totals.into_iter().sum();
    let tax = (subtotal * tax_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    (subtotal, tax, subtotal + tax)
}

fn line_item(lr: &LrRequest, sort_order: i32) -> InvoiceItemDraft {
    let quantity = Decimal::ONE;
    let unit_price = lr.billable_price();
    InvoiceItemDraft {
        lr_id: lr.lr_id,
        lr_number: lr.lr_number.clone(),
        file_number: file_of(lr),
        description: format!(
            "LR {}: {} → {}",
            lr.lr_number,
            lr.origin.as_deref().unwrap_or("-"),
            lr.destination.as_deref().unwrap_or("-")
        ),
        quantity,
        unit_price,
        extra_cost: lr.extra_cost,
        total: quantity * unit_price + lr.extra_cost,
        sort_order,
    }
}

fn file_of(lr: &LrRequest) -> String {
    lr.file().unwrap_or_default().to_string()
}

fn sort_members(members: &mut [LrRequest]) {
    members.sort_by(|a, b| {
        a.file()
            .cmp(&b.file())
            .then_with(|| a.lr_number.cmp(&b.lr_number))
    });
}

fn ensure_unlocked(members: &[LrRequest]) -> Result<(), AppError> {
    if let Some(lr) = members.iter().find(|lr| lr.is_locked()) {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "LR {} already invoiced",
            lr.lr_number
        )));
    }
    Ok(())
}

/// Every LR needs a POD; the error names the offending files.
fn ensure_pods(members: &[LrRequest]) -> Result<(), AppError> {
    let missing: BTreeSet<String> = members
        .iter()
        .filter(|lr| !lr.has_pod())
        .map(file_of)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::InvalidState(anyhow::anyhow!(
        "Missing POD for files: {}",
        missing.into_iter().collect::<Vec<_>>().join(", ")
    )))
}
