//! Attach behaviour when another attach interleaves with the group upsert
//! and the conditional link.

mod common;

use annexure_service::models::{
    Annexure, AnnexureFileGroup, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus,
    ListAnnexuresFilter, LrRequest, NewAnnexure, NewLrRequest,
};
use annexure_service::services::{LrIntake, MembershipEngine};
use annexure_service::store::{
    AnnexureRepository, FileGroupRepository, InvoiceRepository, LedgerStore, LrRepository,
    MemoryLedgerStore,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{dec, strings};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Copy)]
enum Interleave {
    /// A losing attach deletes the group right after it is handed out.
    GroupDeleted,
    /// Another annexure links the LR just before this attach does.
    LrTaken(Uuid),
}

/// Memory store that replays one armed concurrent write, once.
struct InterleavedStore {
    inner: MemoryLedgerStore,
    armed: Mutex<Option<Interleave>>,
}

impl InterleavedStore {
    fn new() -> Self {
        Self {
            inner: MemoryLedgerStore::new(),
            armed: Mutex::new(None),
        }
    }

    fn arm(&self, interleave: Interleave) {
        *self.armed.lock().unwrap() = Some(interleave);
    }

    fn take(&self, wanted: fn(&Interleave) -> bool) -> Option<Interleave> {
        let mut armed = self.armed.lock().unwrap();
        if armed.as_ref().is_some_and(wanted) {
            armed.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl LrRepository for InterleavedStore {
    async fn insert_lr(&self, lr: &NewLrRequest) -> Result<LrRequest, AppError> {
        self.inner.insert_lr(lr).await
    }

    async fn find_lr_by_number(&self, lr_number: &str) -> Result<Option<LrRequest>, AppError> {
        self.inner.find_lr_by_number(lr_number).await
    }

    async fn find_lrs_by_numbers(&self, lr_numbers: &[String]) -> Result<Vec<LrRequest>, AppError> {
        self.inner.find_lrs_by_numbers(lr_numbers).await
    }

    async fn find_lrs_by_file(&self, file_number: &str) -> Result<Vec<LrRequest>, AppError> {
        self.inner.find_lrs_by_file(file_number).await
    }

    async fn find_lrs_by_annexure(&self, annexure_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        self.inner.find_lrs_by_annexure(annexure_id).await
    }

    async fn find_lrs_by_group(&self, group_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        self.inner.find_lrs_by_group(group_id).await
    }

    async fn count_lrs_in_annexure_file(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<u64, AppError> {
        self.inner
            .count_lrs_in_annexure_file(annexure_id, file_number)
            .await
    }

    async fn set_podlink(&self, lr_id: Uuid, podlink: &str) -> Result<Option<LrRequest>, AppError> {
        self.inner.set_podlink(lr_id, podlink).await
    }

    async fn link_lr(
        &self,
        lr_id: Uuid,
        annexure_id: Uuid,
        group_id: Uuid,
    ) -> Result<bool, AppError> {
        if let Some(Interleave::LrTaken(other)) =
            self.take(|i| matches!(i, Interleave::LrTaken(_)))
        {
            let ours = self.inner.get_group(group_id).await?.unwrap();
            let (theirs, _) = self
                .inner
                .insert_or_get_group(other, &ours.file_number)
                .await?;
            assert!(self.inner.link_lr(lr_id, other, theirs.group_id).await?);
        }
        self.inner.link_lr(lr_id, annexure_id, group_id).await
    }

    async fn unlink_lr(&self, lr_id: Uuid) -> Result<u64, AppError> {
        self.inner.unlink_lr(lr_id).await
    }

    async fn unlink_file(&self, annexure_id: Uuid, file_number: &str) -> Result<u64, AppError> {
        self.inner.unlink_file(annexure_id, file_number).await
    }

    async fn unlink_group(&self, group_id: Uuid) -> Result<u64, AppError> {
        self.inner.unlink_group(group_id).await
    }

    async fn unlink_annexure(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        self.inner.unlink_annexure(annexure_id).await
    }
}

#[async_trait]
impl AnnexureRepository for InterleavedStore {
    async fn create_annexure(&self, annexure: &NewAnnexure) -> Result<Annexure, AppError> {
        self.inner.create_annexure(annexure).await
    }

    async fn get_annexure(&self, annexure_id: Uuid) -> Result<Option<Annexure>, AppError> {
        self.inner.get_annexure(annexure_id).await
    }

    async fn list_annexures(
        &self,
        filter: &ListAnnexuresFilter,
    ) -> Result<(Vec<Annexure>, Option<Uuid>), AppError> {
        self.inner.list_annexures(filter).await
    }

    async fn adopt_vendor(&self, annexure_id: Uuid, vendor_id: Uuid) -> Result<bool, AppError> {
        self.inner.adopt_vendor(annexure_id, vendor_id).await
    }

    async fn delete_annexure(&self, annexure_id: Uuid) -> Result<bool, AppError> {
        self.inner.delete_annexure(annexure_id).await
    }
}

#[async_trait]
impl FileGroupRepository for InterleavedStore {
    async fn insert_or_get_group(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<(AnnexureFileGroup, bool), AppError> {
        let (group, created) = self.inner.insert_or_get_group(annexure_id, file_number).await?;
        if self
            .take(|i| matches!(i, Interleave::GroupDeleted))
            .is_some()
        {
            // Handed out as existing, then removed by the attach that made it.
            assert!(self.inner.delete_group_if_empty(group.group_id).await?);
            return Ok((group, false));
        }
        Ok((group, created))
    }

    async fn get_group(&self, group_id: Uuid) -> Result<Option<AnnexureFileGroup>, AppError> {
        self.inner.get_group(group_id).await
    }

    async fn list_groups(&self, annexure_id: Uuid) -> Result<Vec<AnnexureFileGroup>, AppError> {
        self.inner.list_groups(annexure_id).await
    }

    async fn refresh_group_totals(
        &self,
        group_id: Uuid,
    ) -> Result<Option<AnnexureFileGroup>, AppError> {
        self.inner.refresh_group_totals(group_id).await
    }

    async fn delete_group_if_empty(&self, group_id: Uuid) -> Result<bool, AppError> {
        self.inner.delete_group_if_empty(group_id).await
    }

    async fn delete_empty_groups(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        self.inner.delete_empty_groups(annexure_id).await
    }
}

#[async_trait]
impl InvoiceRepository for InterleavedStore {
    async fn create_invoices(&self, drafts: &[InvoiceDraft]) -> Result<Vec<Invoice>, AppError> {
        self.inner.create_invoices(drafts).await
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice(invoice_id).await
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        self.inner.invoice_items(invoice_id).await
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.update_invoice_status(invoice_id, from, to).await
    }
}

#[async_trait]
impl LedgerStore for InterleavedStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

async fn annexure(store: &InterleavedStore, name: &str) -> Annexure {
    store
        .create_annexure(&NewAnnexure {
            name: name.to_string(),
            from_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            vendor_id: None,
        })
        .await
        .unwrap()
}

async fn submit(store: Arc<InterleavedStore>, number: &str, file: &str) -> LrRequest {
    LrIntake::new(store)
        .submit_lr(NewLrRequest {
            lr_number: number.to_string(),
            file_number: Some(file.to_string()),
            vendor_id: Uuid::new_v4(),
            origin: None,
            destination: None,
            remark: None,
            podlink: Some("https://blob.example/pod.pdf".to_string()),
            lr_price: Some(dec("1000")),
            price_settled: None,
            extra_cost: dec("50"),
        })
        .await
        .expect("Failed to submit LR")
}

#[tokio::test]
async fn test_attach_retries_when_group_is_deleted_before_link() {
    common::init_tracing();
    let store = Arc::new(InterleavedStore::new());
    let target = annexure(&store, "Target").await;
    submit(store.clone(), "LR1", "F-1").await;
    store.arm(Interleave::GroupDeleted);

    let report = MembershipEngine::new(store.clone())
        .attach_lrs(target.annexure_id, &strings(&["LR1"]))
        .await
        .expect("attach failed");

    assert_eq!(report.added, vec!["LR1"]);
    assert!(report.already_annexured.is_empty());

    let lr = store.find_lr_by_number("LR1").await.unwrap().unwrap();
    assert_eq!(lr.annexure_id, Some(target.annexure_id));
    let group_id = lr.group_id.expect("LR should reference a group");
    let group = store
        .get_group(group_id)
        .await
        .unwrap()
        .expect("linked group must exist");
    assert_eq!(group.annexure_id, target.annexure_id);
    assert_eq!(group.file_number, "F-1");
    assert_eq!(group.total_price, dec("1000"));

    let groups = store.list_groups(target.annexure_id).await.unwrap();
    assert_eq!(groups.len(), 1);
}

#[tokio::test]
async fn test_attach_losing_the_lr_cleans_up_its_new_group() {
    common::init_tracing();
    let store = Arc::new(InterleavedStore::new());
    let winner = annexure(&store, "Winner").await;
    let target = annexure(&store, "Target").await;
    submit(store.clone(), "LR1", "F-1").await;
    store.arm(Interleave::LrTaken(winner.annexure_id));

    let report = MembershipEngine::new(store.clone())
        .attach_lrs(target.annexure_id, &strings(&["LR1"]))
        .await
        .expect("attach failed");

    assert!(report.added.is_empty());
    assert_eq!(report.already_annexured, vec!["LR1"]);
    assert!(report.created_groups.is_empty());
    assert!(store.list_groups(target.annexure_id).await.unwrap().is_empty());

    let lr = store.find_lr_by_number("LR1").await.unwrap().unwrap();
    assert_eq!(lr.annexure_id, Some(winner.annexure_id));
    assert_eq!(store.list_groups(winner.annexure_id).await.unwrap().len(), 1);
}
