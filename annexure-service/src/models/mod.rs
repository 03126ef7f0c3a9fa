//! Domain models for annexure-service.

mod annexure;
mod costing;
mod invoice;
mod lr_request;
mod membership;

pub use annexure::{Annexure, AnnexureFileGroup, ListAnnexuresFilter, NewAnnexure};
pub use costing::{CostLine, CostReconciliation, CostStatus, CostingRecord};
pub use invoice::{Invoice, InvoiceDraft, InvoiceItem, InvoiceItemDraft, InvoiceStatus};
pub use lr_request::{normalize_lr_number, AttachPod, LrRequest, NewLrRequest};
pub use membership::{AttachOutcome, AttachReport, FileMember, FileValidation, RemovalOutcome};
