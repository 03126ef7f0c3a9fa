//! In-process Ledger Store.
//!
//! Holds every table behind one mutex and enforces the same unique keys and
//! conditional writes as the Postgres schema. Used by the `memory` backend
//! and by the test suites.

use super::{
    clamp_page_size, AnnexureRepository, FileGroupRepository, InvoiceRepository, LedgerStore,
    LrRepository,
};
use crate::models::{
    Annexure, AnnexureFileGroup, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus,
    ListAnnexuresFilter, LrRequest, NewAnnexure, NewLrRequest,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
struct State {
    lrs: HashMap<Uuid, LrRequest>,
    annexures: BTreeMap<Uuid, Annexure>,
    groups: HashMap<Uuid, AnnexureFileGroup>,
    invoices: HashMap<Uuid, Invoice>,
    items: Vec<InvoiceItem>,
}

impl State {
    fn lr_by_number(&self, lr_number: &str) -> Option<&LrRequest> {
        self.lrs.values().find(|lr| lr.lr_number == lr_number)
    }

    fn unlink(&mut self, pred: impl Fn(&LrRequest) -> bool) -> u64 {
        let now = Utc::now();
        let mut count = 0;
        for lr in self.lrs.values_mut() {
            if lr.annexure_id.is_some() && !lr.is_locked() && pred(lr) {
                lr.annexure_id = None;
                lr.group_id = None;
                lr.updated_utc = now;
                count += 1;
            }
        }
        count
    }

    fn group_is_empty(&self, group_id: Uuid) -> bool {
        !self.lrs.values().any(|lr| lr.group_id == Some(group_id))
    }
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<State>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("Ledger store lock poisoned")))
    }
}

#[async_trait]
impl LrRepository for MemoryLedgerStore {
    async fn insert_lr(&self, lr: &NewLrRequest) -> Result<LrRequest, AppError> {
        let mut state = self.state()?;
        if state.lr_by_number(&lr.lr_number).is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "LR '{}' already exists",
                lr.lr_number
            )));
        }

        let now = Utc::now();
        let created = LrRequest {
            lr_id: Uuid::new_v4(),
            lr_number: lr.lr_number.clone(),
            file_number: lr.file_number.clone(),
            vendor_id: lr.vendor_id,
            origin: lr.origin.clone(),
            destination: lr.destination.clone(),
            remark: lr.remark.clone(),
            podlink: lr.podlink.clone(),
            lr_price: lr.lr_price,
            price_settled: lr.price_settled,
            extra_cost: lr.extra_cost,
            is_invoiced: false,
            annexure_id: None,
            group_id: None,
            invoice_id: None,
            created_utc: now,
            updated_utc: now,
        };
        state.lrs.insert(created.lr_id, created.clone());
        debug!(lr_number = %created.lr_number, "LR recorded");

        Ok(created)
    }

    async fn find_lr_by_number(&self, lr_number: &str) -> Result<Option<LrRequest>, AppError> {
        Ok(self.state()?.lr_by_number(lr_number).cloned())
    }

    async fn find_lrs_by_numbers(&self, lr_numbers: &[String]) -> Result<Vec<LrRequest>, AppError> {
        let state = self.state()?;
        let mut lrs: Vec<LrRequest> = state
            .lrs
            .values()
            .filter(|lr| lr_numbers.contains(&lr.lr_number))
            .cloned()
            .collect();
        lrs.sort_by(|a, b| a.lr_number.cmp(&b.lr_number));
        Ok(lrs)
    }

    async fn find_lrs_by_file(&self, file_number: &str) -> Result<Vec<LrRequest>, AppError> {
        let state = self.state()?;
        let mut lrs: Vec<LrRequest> = state
            .lrs
            .values()
            .filter(|lr| lr.file_number.as_deref() == Some(file_number))
            .cloned()
            .collect();
        lrs.sort_by(|a, b| a.lr_number.cmp(&b.lr_number));
        Ok(lrs)
    }

    async fn find_lrs_by_annexure(&self, annexure_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        let state = self.state()?;
        let mut lrs: Vec<LrRequest> = state
            .lrs
            .values()
            .filter(|lr| lr.annexure_id == Some(annexure_id))
            .cloned()
            .collect();
        lrs.sort_by(|a, b| {
            a.file()
                .cmp(&b.file())
                .then_with(|| a.lr_number.cmp(&b.lr_number))
        });
        Ok(lrs)
    }

    async fn find_lrs_by_group(&self, group_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        let state = self.state()?;
        let mut lrs: Vec<LrRequest> = state
            .lrs
            .values()
            .filter(|lr| lr.group_id == Some(group_id))
            .cloned()
            .collect();
        lrs.sort_by(|a, b| a.lr_number.cmp(&b.lr_number));
        Ok(lrs)
    }

    async fn count_lrs_in_annexure_file(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<u64, AppError> {
        let state = self.state()?;
        let count = state
            .lrs
            .values()
            .filter(|lr| {
                lr.annexure_id == Some(annexure_id) && lr.file_number.as_deref() == Some(file_number)
            })
            .count();
        Ok(count as u64)
    }

    async fn set_podlink(&self, lr_id: Uuid, podlink: &str) -> Result<Option<LrRequest>, AppError> {
        let mut state = self.state()?;
        match state.lrs.get_mut(&lr_id) {
            Some(lr) if !lr.is_locked() => {
                lr.podlink = Some(podlink.to_string());
                lr.updated_utc = Utc::now();
                Ok(Some(lr.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn link_lr(
        &self,
        lr_id: Uuid,
        annexure_id: Uuid,
        group_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let group_matches = state
            .groups
            .get(&group_id)
            .is_some_and(|g| g.annexure_id == annexure_id);
        if !group_matches {
            return Ok(false);
        }
        match state.lrs.get_mut(&lr_id) {
            Some(lr) if lr.annexure_id.is_none() && lr.group_id.is_none() && !lr.is_locked() => {
                lr.annexure_id = Some(annexure_id);
                lr.group_id = Some(group_id);
                lr.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlink_lr(&self, lr_id: Uuid) -> Result<u64, AppError> {
        Ok(self.state()?.unlink(|lr| lr.lr_id == lr_id))
    }

    async fn unlink_file(&self, annexure_id: Uuid, file_number: &str) -> Result<u64, AppError> {
        Ok(self.state()?.unlink(|lr| {
            lr.annexure_id == Some(annexure_id) && lr.file_number.as_deref() == Some(file_number)
        }))
    }

    async fn unlink_group(&self, group_id: Uuid) -> Result<u64, AppError> {
        Ok(self.state()?.unlink(|lr| lr.group_id == Some(group_id)))
    }

    async fn unlink_annexure(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        Ok(self.state()?.unlink(|lr| lr.annexure_id == Some(annexure_id)))
    }
}

#[async_trait]
impl AnnexureRepository for MemoryLedgerStore {
    async fn create_annexure(&self, annexure: &NewAnnexure) -> Result<Annexure, AppError> {
        let mut state = self.state()?;
        let now = Utc::now();
        let created = Annexure {
            annexure_id: Uuid::new_v4(),
            name: annexure.name.clone(),
            from_date: annexure.from_date,
            vendor_id: annexure.vendor_id,
            is_invoiced: false,
            invoice_id: None,
            created_utc: now,
            updated_utc: now,
        };
        state.annexures.insert(created.annexure_id, created.clone());
        Ok(created)
    }

    async fn get_annexure(&self, annexure_id: Uuid) -> Result<Option<Annexure>, AppError> {
        Ok(self.state()?.annexures.get(&annexure_id).cloned())
    }

    async fn list_annexures(
        &self,
        filter: &ListAnnexuresFilter,
    ) -> Result<(Vec<Annexure>, Option<Uuid>), AppError> {
        let state = self.state()?;
        let limit = clamp_page_size(filter.page_size) as usize;
        let after = filter.page_token;

        let mut page: Vec<Annexure> = state
            .annexures
            .values()
            .filter(|a| after.map_or(true, |cursor| a.annexure_id > cursor))
            .take(limit + 1)
            .cloned()
            .collect();

        let has_more = page.len() > limit;
        if has_more {
            page.pop();
        }
        let next = if has_more {
            page.last().map(|a| a.annexure_id)
        } else {
            None
        };

        Ok((page, next))
    }

    async fn adopt_vendor(&self, annexure_id: Uuid, vendor_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.annexures.get_mut(&annexure_id) {
            Some(annexure) if annexure.vendor_id.is_none() => {
                annexure.vendor_id = Some(vendor_id);
                annexure.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_annexure(&self, annexure_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let referenced = state.lrs.values().any(|lr| lr.annexure_id == Some(annexure_id))
            || state.groups.values().any(|g| g.annexure_id == annexure_id);
        if referenced {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Annexure {} is still referenced",
                annexure_id
            )));
        }
        Ok(state.annexures.remove(&annexure_id).is_some())
    }
}

#[async_trait]
impl FileGroupRepository for MemoryLedgerStore {
    async fn insert_or_get_group(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<(AnnexureFileGroup, bool), AppError> {
        let mut state = self.state()?;
        if let Some(existing) = state
            .groups
            .values()
            .find(|g| g.annexure_id == annexure_id && g.file_number == file_number)
        {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let group = AnnexureFileGroup {
            group_id: Uuid::new_v4(),
            annexure_id,
            file_number: file_number.to_string(),
            total_price: Decimal::ZERO,
            extra_cost: Decimal::ZERO,
            created_utc: now,
            updated_utc: now,
        };
        state.groups.insert(group.group_id, group.clone());
        Ok((group, true))
    }

    async fn get_group(&self, group_id: Uuid) -> Result<Option<AnnexureFileGroup>, AppError> {
        Ok(self.state()?.groups.get(&group_id).cloned())
    }

    async fn list_groups(&self, annexure_id: Uuid) -> Result<Vec<AnnexureFileGroup>, AppError> {
        let state = self.state()?;
        let mut groups: Vec<AnnexureFileGroup> = state
            .groups
            .values()
            .filter(|g| g.annexure_id == annexure_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.file_number.cmp(&b.file_number));
        Ok(groups)
    }

    async fn refresh_group_totals(
        &self,
        group_id: Uuid,
    ) -> Result<Option<AnnexureFileGroup>, AppError> {
        let mut state = self.state()?;
        let (total_price, extra_cost) = state
            .lrs
            .values()
            .filter(|lr| lr.group_id == Some(group_id))
            .fold((Decimal::ZERO, Decimal::ZERO), |(price, extra), lr| {
                (price + lr.billable_price(), extra + lr.extra_cost)
            });

        Ok(state.groups.get_mut(&group_id).map(|group| {
            group.total_price = total_price;
            group.extra_cost = extra_cost;
            group.updated_utc = Utc::now();
            group.clone()
        }))
    }

    async fn delete_group_if_empty(&self, group_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state()?;
        if !state.group_is_empty(group_id) {
            return Ok(false);
        }
        Ok(state.groups.remove(&group_id).is_some())
    }

    async fn delete_empty_groups(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        let mut state = self.state()?;
        let empty: Vec<Uuid> = state
            .groups
            .values()
            .filter(|g| g.annexure_id == annexure_id)
            .map(|g| g.group_id)
            .filter(|id| state.group_is_empty(*id))
            .collect();
        for id in &empty {
            state.groups.remove(id);
        }
        Ok(empty.len() as u64)
    }
}

#[async_trait]
impl InvoiceRepository for MemoryLedgerStore {
    async fn create_invoices(&self, drafts: &[InvoiceDraft]) -> Result<Vec<Invoice>, AppError> {
        let mut state = self.state()?;

        // Validate the whole batch before touching state so a failure writes nothing.
        let mut seen_numbers = Vec::new();
        let mut seen_lrs = Vec::new();
        for draft in drafts {
            if seen_numbers.contains(&draft.invoice_number)
                || state
                    .invoices
                    .values()
                    .any(|i| i.invoice_number == draft.invoice_number)
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice '{}' already exists",
                    draft.invoice_number
                )));
            }
            seen_numbers.push(draft.invoice_number.clone());

            for item in &draft.items {
                let linkable = state
                    .lrs
                    .get(&item.lr_id)
                    .map(|lr| !lr.is_locked() && lr.annexure_id == draft.annexure_id)
                    .unwrap_or(false);
                if !linkable || seen_lrs.contains(&item.lr_id) {
                    warn!(
                        invoice_number = %draft.invoice_number,
                        lr_number = %item.lr_number,
                        "LR set changed during invoice generation"
                    );
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "One or more LRs were invoiced concurrently"
                    )));
                }
                seen_lrs.push(item.lr_id);
            }

            if let Some(annexure_id) = draft.annexure_id {
                let open = state
                    .annexures
                    .get(&annexure_id)
                    .map(|a| !a.is_closed())
                    .unwrap_or(false);
                if !open {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Annexure already invoiced"
                    )));
                }
            }
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let invoice = Invoice {
                invoice_id: Uuid::new_v4(),
                invoice_number: draft.invoice_number.clone(),
                vendor_id: draft.vendor_id,
                annexure_id: draft.annexure_id,
                status: InvoiceStatus::Draft.as_str().to_string(),
                subtotal: draft.subtotal,
                tax_amount: draft.tax_amount,
                grand_total: draft.grand_total,
                created_utc: now,
                updated_utc: now,
            };

            for item in &draft.items {
                state.items.push(InvoiceItem {
                    item_id: Uuid::new_v4(),
                    invoice_id: invoice.invoice_id,
                    lr_id: item.lr_id,
                    lr_number: item.lr_number.clone(),
                    file_number: item.file_number.clone(),
                    description: item.description.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    extra_cost: item.extra_cost,
                    total: item.total,
                    sort_order: item.sort_order,
                    created_utc: now,
                });
                if let Some(lr) = state.lrs.get_mut(&item.lr_id) {
                    lr.is_invoiced = true;
                    lr.invoice_id = Some(invoice.invoice_id);
                    lr.updated_utc = now;
                }
            }

            if let Some(annexure) = draft
                .annexure_id
                .and_then(|id| state.annexures.get_mut(&id))
            {
                annexure.is_invoiced = true;
                annexure.invoice_id = Some(invoice.invoice_id);
                annexure.updated_utc = now;
            }

            state.invoices.insert(invoice.invoice_id, invoice.clone());
            created.push(invoice);
        }

        Ok(created)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.state()?.invoices.get(&invoice_id).cloned())
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let state = self.state()?;
        let mut items: Vec<InvoiceItem> = state
            .items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sort_order);
        Ok(items)
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state()?;
        match state.invoices.get_mut(&invoice_id) {
            Some(invoice) if invoice.status() == from => {
                invoice.status = to.as_str().to_string();
                invoice.updated_utc = Utc::now();
                Ok(Some(invoice.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.state().map(|_| ())
    }
}
