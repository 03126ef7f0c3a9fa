//! Annexure membership: creating annexures and moving LRs and whole files
//! in and out of them.

use crate::models::{
    normalize_lr_number, Annexure, AnnexureFileGroup, AttachOutcome, AttachReport,
    ListAnnexuresFilter, LrRequest, NewAnnexure, RemovalOutcome,
};
use crate::services::file_resolver::FileGroupResolver;
use crate::services::metrics::record_attach_outcome;
use crate::store::SharedStore;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Group lookups per LR before an attach gives up on it.
const LINK_ATTEMPTS: usize = 2;

/// An annexure with its file groups and member LRs.
#[derive(Debug, Clone)]
pub struct AnnexureDetail {
    pub annexure: Annexure,
    pub groups: Vec<AnnexureFileGroup>,
    pub members: Vec<LrRequest>,
}

#[derive(Clone)]
pub struct MembershipEngine {
    store: SharedStore,
    resolver: FileGroupResolver,
}

impl MembershipEngine {
    pub fn new(store: SharedStore) -> Self {
        let resolver = FileGroupResolver::new(store.clone());
        Self { store, resolver }
    }

    // =========================================================================
    // Annexure administration
    // =========================================================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_annexure(&self, input: NewAnnexure) -> Result<Annexure, AppError> {
        input.validate()?;
        let input = NewAnnexure {
            name: input.name.trim().to_string(),
            ..input
        };
        if input.name.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("name must not be blank")));
        }
        self.store.create_annexure(&input).await
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn get_annexure(&self, annexure_id: Uuid) -> Result<AnnexureDetail, AppError> {
        let annexure = self.require_annexure(annexure_id).await?;
        let groups = self.store.list_groups(annexure_id).await?;
        let members = self.store.find_lrs_by_annexure(annexure_id).await?;

        Ok(AnnexureDetail {
            annexure,
            groups,
            members,
        })
    }

    pub async fn list_annexures(
        &self,
        filter: &ListAnnexuresFilter,
    ) -> Result<(Vec<Annexure>, Option<Uuid>), AppError> {
        self.store.list_annexures(filter).await
    }

    /// Unlink every member, drop the groups, then the annexure itself.
    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn delete_annexure(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        self.require_open_annexure(annexure_id).await?;

        let members = self.store.find_lrs_by_annexure(annexure_id).await?;
        if members.iter().any(LrRequest::is_locked) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Annexure has invoiced LRs"
            )));
        }

        let unlinked = self.store.unlink_annexure(annexure_id).await?;
        self.store.delete_empty_groups(annexure_id).await?;

        if !self.store.list_groups(annexure_id).await?.is_empty() {
            warn!("Annexure gained members while being deleted");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Annexure was modified concurrently"
            )));
        }
        self.store.delete_annexure(annexure_id).await?;

        info!(unlinked = unlinked, "Annexure deleted");
        Ok(unlinked)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Attach LRs by number. Each input lands in exactly one report bucket.
    #[instrument(skip(self, raw_lr_numbers), fields(annexure_id = %annexure_id, count = raw_lr_numbers.len()))]
    pub async fn attach_lrs(
        &self,
        annexure_id: Uuid,
        raw_lr_numbers: &[String],
    ) -> Result<AttachReport, AppError> {
        let annexure = self.require_open_annexure(annexure_id).await?;

        if raw_lr_numbers.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "lr_numbers must not be empty"
            )));
        }

        let numbers: Vec<String> = raw_lr_numbers
            .iter()
            .map(|n| normalize_lr_number(n))
            .collect();
        let lookup = dedupe(&numbers);
        let found: HashMap<String, LrRequest> = self
            .store
            .find_lrs_by_numbers(&lookup)
            .await?
            .into_iter()
            .map(|lr| (lr.lr_number.clone(), lr))
            .collect();

        let mut report = AttachReport::default();
        let mut seen = HashSet::new();
        let mut touched: Vec<Uuid> = Vec::new();
        let mut vendor = None;

        for number in numbers {
            if !seen.insert(number.clone()) {
                report.record(AttachOutcome::DuplicateInFile, number);
                continue;
            }
            let Some(lr) = found.get(&number) else {
                report.record(AttachOutcome::MissingInDb, number);
                continue;
            };
            if lr.annexure_id.is_some() {
                report.record(AttachOutcome::AlreadyAnnexured, number);
                continue;
            }
            if lr.is_locked() {
                report.record(AttachOutcome::AlreadyInvoiced, number);
                continue;
            }
            if !lr.has_pod() {
                report.record(AttachOutcome::MissingPod, number);
                continue;
            }
            let Some(file_number) = lr.file() else {
                report.record(AttachOutcome::NoFileNumber, number);
                continue;
            };

            match self.link_into_group(lr, annexure_id, file_number).await? {
                Some((group, created)) => {
                    if !touched.contains(&group.group_id) {
                        touched.push(group.group_id);
                    }
                    if created {
                        report.created_groups.push(group);
                    }
                    vendor.get_or_insert(lr.vendor_id);
                    report.record(AttachOutcome::Added, number);
                }
                None => report.record(AttachOutcome::AlreadyAnnexured, number),
            }
        }

        for group_id in &touched {
            if let Some(refreshed) = self.store.refresh_group_totals(*group_id).await? {
                if let Some(slot) = report
                    .created_groups
                    .iter_mut()
                    .find(|g| g.group_id == refreshed.group_id)
                {
                    *slot = refreshed;
                }
            }
        }

        if let (None, Some(vendor_id)) = (annexure.vendor_id, vendor) {
            self.store.adopt_vendor(annexure_id, vendor_id).await?;
        }

        record_report(&report);
        info!(
            added = report.added.len(),
            missing_in_db = report.missing_in_db.len(),
            already_annexured = report.already_annexured.len(),
            already_invoiced = report.already_invoiced.len(),
            missing_pod = report.missing_pod.len(),
            duplicate_in_file = report.duplicate_in_file.len(),
            no_file_number = report.no_file_number.len(),
            created_groups = report.created_groups.len(),
            "LRs attached"
        );

        Ok(report)
    }

    /// Link one LR into the group for its file. `None` when another attach
    /// took the LR first.
    ///
    /// A group handed out by `insert_or_get_group` can be deleted by a losing
    /// attach before this link lands, so a miss on a group that no longer
    /// exists is retried once with a fresh group.
    async fn link_into_group(
        &self,
        lr: &LrRequest,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<Option<(AnnexureFileGroup, bool)>, AppError> {
        for _ in 0..LINK_ATTEMPTS {
            let (group, created) = self
                .store
                .insert_or_get_group(annexure_id, file_number)
                .await?;

            if self
                .store
                .link_lr(lr.lr_id, annexure_id, group.group_id)
                .await?
            {
                return Ok(Some((group, created)));
            }

            if created {
                self.store.delete_group_if_empty(group.group_id).await?;
                return Ok(None);
            }
            if self.store.get_group(group.group_id).await?.is_some() {
                return Ok(None);
            }
            debug!(file_number, "File group vanished before link, retrying");
        }
        Ok(None)
    }

    /// Validate the file owning `lr_number`, then attach all of its members.
    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn attach_file(
        &self,
        annexure_id: Uuid,
        lr_number: &str,
    ) -> Result<(String, AttachReport), AppError> {
        let file = self.resolver.resolve(lr_number, annexure_id).await?;
        let numbers: Vec<String> = file.members.iter().map(|m| m.lr_number.clone()).collect();
        let report = self.attach_lrs(annexure_id, &numbers).await?;
        Ok((file.file_number, report))
    }

    /// Remove an LR from an annexure. Removing one LR of a multi-LR file
    /// needs confirmation and then removes the whole file.
    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn remove_lr(
        &self,
        annexure_id: Uuid,
        lr_number: &str,
        confirm_file_removal: bool,
    ) -> Result<RemovalOutcome, AppError> {
        let lr_number = normalize_lr_number(lr_number);
        let lr = self
            .store
            .find_lr_by_number(&lr_number)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("LR not found")))?;

        self.require_open_annexure(annexure_id).await?;

        if lr.annexure_id != Some(annexure_id) {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "LR does not belong to this annexure"
            )));
        }
        if lr.is_locked() {
            return Err(AppError::Conflict(anyhow::anyhow!("LR already invoiced")));
        }

        let file_number = lr.file().map(str::to_string);
        let removed_count = match &file_number {
            Some(file) => {
                let affected = self
                    .store
                    .count_lrs_in_annexure_file(annexure_id, file)
                    .await?;
                if affected > 1 && !confirm_file_removal {
                    info!(file_number = %file, affected = affected, "File removal needs confirmation");
                    return Ok(RemovalOutcome::RequiresConfirmation {
                        file_number: file.clone(),
                        affected_count: affected,
                    });
                }
                if affected > 1 {
                    self.store.unlink_file(annexure_id, file).await?
                } else {
                    self.store.unlink_lr(lr.lr_id).await?
                }
            }
            None => self.store.unlink_lr(lr.lr_id).await?,
        };

        let group_deleted = match lr.group_id {
            Some(group_id) => self.cleanup_group(group_id).await?,
            None => false,
        };

        info!(removed = removed_count, group_deleted = group_deleted, "LR removed from annexure");

        Ok(RemovalOutcome::Removed {
            file_number,
            removed_count,
            group_deleted,
        })
    }

    /// Unlink every LR of a group, then delete it.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub async fn delete_group(&self, group_id: Uuid) -> Result<u64, AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("File group not found")))?;

        self.require_open_annexure(group.annexure_id).await?;

        let members = self.store.find_lrs_by_group(group_id).await?;
        if members.iter().any(LrRequest::is_locked) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "File group has invoiced LRs"
            )));
        }

        let unlinked = self.store.unlink_group(group_id).await?;
        if !self.store.delete_group_if_empty(group_id).await? {
            warn!("File group gained members while being deleted");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "File group was modified concurrently"
            )));
        }

        info!(unlinked = unlinked, file_number = %group.file_number, "File group deleted");
        Ok(unlinked)
    }

    /// The subset of `lr_numbers` already linked to any annexure, in input order.
    #[instrument(skip(self, lr_numbers), fields(count = lr_numbers.len()))]
    pub async fn validate_existing(&self, lr_numbers: &[String]) -> Result<Vec<String>, AppError> {
        let numbers: Vec<String> = lr_numbers.iter().map(|n| normalize_lr_number(n)).collect();
        let numbers = dedupe(&numbers);
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let linked: HashSet<String> = self
            .store
            .find_lrs_by_numbers(&numbers)
            .await?
            .into_iter()
            .filter(|lr| lr.annexure_id.is_some())
            .map(|lr| lr.lr_number)
            .collect();

        Ok(numbers.into_iter().filter(|n| linked.contains(n)).collect())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn require_annexure(&self, annexure_id: Uuid) -> Result<Annexure, AppError> {
        self.store
            .get_annexure(annexure_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Annexure not found")))
    }

    async fn require_open_annexure(&self, annexure_id: Uuid) -> Result<Annexure, AppError> {
        let annexure = self.require_annexure(annexure_id).await?;
        if annexure.is_closed() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Annexure already invoiced"
            )));
        }
        Ok(annexure)
    }

    /// Delete the group if it lost its last member, otherwise recompute its totals.
    async fn cleanup_group(&self, group_id: Uuid) -> Result<bool, AppError> {
        if self.store.delete_group_if_empty(group_id).await? {
            return Ok(true);
        }
        self.store.refresh_group_totals(group_id).await?;
        Ok(false)
    }
}

/// Order-preserving de-duplication.
fn dedupe(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

fn record_report(report: &AttachReport) {
    record_attach_outcome(AttachOutcome::Added.as_str(), report.added.len());
    record_attach_outcome(AttachOutcome::MissingInDb.as_str(), report.missing_in_db.len());
    record_attach_outcome(
        AttachOutcome::AlreadyAnnexured.as_str(),
        report.already_annexured.len(),
    );
    record_attach_outcome(
        AttachOutcome::AlreadyInvoiced.as_str(),
        report.already_invoiced.len(),
    );
    record_attach_outcome(AttachOutcome::MissingPod.as_str(), report.missing_pod.len());
    record_attach_outcome(
        AttachOutcome::DuplicateInFile.as_str(),
        report.duplicate_in_file.len(),
    );
    record_attach_outcome(
        AttachOutcome::NoFileNumber.as_str(),
        report.no_file_number.len(),
    );
}

#[cfg(test)]
mod tests {
    use super::dedupe;

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let input: Vec<String> = ["B", "A", "B", "C", "A"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedupe(&input), vec!["B", "A", "C"]);
    }
}
