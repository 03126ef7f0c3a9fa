//! Outcome types for file validation and annexure membership changes.

use crate::models::{AnnexureFileGroup, LrRequest};
use rust_decimal::Decimal;
use serde::Serialize;

/// Projection of a file member shown to the caller before committing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMember {
    pub lr_number: String,
    pub price: Decimal,
    pub extra_cost: Decimal,
    pub podlink: Option<String>,
    pub remark: Option<String>,
}

impl From<&LrRequest> for FileMember {
    fn from(lr: &LrRequest) -> Self {
        Self {
            lr_number: lr.lr_number.clone(),
            price: lr.billable_price(),
            extra_cost: lr.extra_cost,
            podlink: lr.podlink.clone(),
            remark: lr.remark.clone(),
        }
    }
}

/// A file that may be attached to the target annexure.
#[derive(Debug, Clone, Serialize)]
pub struct FileValidation {
    pub file_number: String,
    /// Ordered by LR number ascending.
    pub members: Vec<FileMember>,
}

/// Per-LR classification in a bulk attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Added,
    MissingInDb,
    AlreadyAnnexured,
    AlreadyInvoiced,
    MissingPod,
    DuplicateInFile,
    NoFileNumber,
}

impl AttachOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachOutcome::Added => "added",
            AttachOutcome::MissingInDb => "missing_in_db",
            AttachOutcome::AlreadyAnnexured => "already_annexured",
            AttachOutcome::AlreadyInvoiced => "already_invoiced",
            AttachOutcome::MissingPod => "missing_pod",
            AttachOutcome::DuplicateInFile => "duplicate_in_file",
            AttachOutcome::NoFileNumber => "no_file_number",
        }
    }
}

/// Bulk attach report. Every input LR number lands in exactly one bucket,
/// in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachReport {
    pub added: Vec<String>,
    pub missing_in_db: Vec<String>,
    pub already_annexured: Vec<String>,
    pub already_invoiced: Vec<String>,
    pub missing_pod: Vec<String>,
    pub duplicate_in_file: Vec<String>,
    pub no_file_number: Vec<String>,
    pub created_groups: Vec<AnnexureFileGroup>,
}

impl AttachReport {
    pub fn record(&mut self, outcome: AttachOutcome, lr_number: String) {
        let bucket = match outcome {
            AttachOutcome::Added => &mut self.added,
            AttachOutcome::MissingInDb => &mut self.missing_in_db,
            AttachOutcome::AlreadyAnnexured => &mut self.already_annexured,
            AttachOutcome::AlreadyInvoiced => &mut self.already_invoiced,
            AttachOutcome::MissingPod => &mut self.missing_pod,
            AttachOutcome::DuplicateInFile => &mut self.duplicate_in_file,
            AttachOutcome::NoFileNumber => &mut self.no_file_number,
        };
        bucket.push(lr_number);
    }

    /// Number of LR numbers classified across all buckets.
    pub fn classified(&self) -> usize {
        self.added.len()
            + self.missing_in_db.len()
            + self.already_annexured.len()
            + self.already_invoiced.len()
            + self.missing_pod.len()
            + self.duplicate_in_file.len()
            + self.no_file_number.len()
    }
}

/// Result of removing an LR from an annexure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed {
        file_number: Option<String>,
        removed_count: u64,
        group_deleted: bool,
    },
    /// Nothing was changed; re-invoke with confirmation to drop the whole file.
    RequiresConfirmation {
        file_number: String,
        affected_count: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_routes_to_bucket() {
        let mut report = AttachReport::default();
        report.record(AttachOutcome::Added, "LR1".into());
        report.record(AttachOutcome::DuplicateInFile, "LR1".into());
        report.record(AttachOutcome::MissingPod, "LR2".into());

        assert_eq!(report.added, vec!["LR1"]);
        assert_eq!(report.duplicate_in_file, vec!["LR1"]);
        assert_eq!(report.missing_pod, vec!["LR2"]);
        assert_eq!(report.classified(), 3);
    }
}
