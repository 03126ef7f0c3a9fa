//! Conversions between domain models and protobuf messages.

use crate::grpc::proto;
use crate::models::{
    Annexure, AnnexureFileGroup, AttachReport, CostLine, CostStatus, CostingRecord, FileMember,
    InvoiceItem, InvoiceStatus, LrRequest,
};
use crate::services::InvoiceDetail;
use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Request parsing
// ============================================================================

pub fn parse_uuid(field: &str, value: &str) -> Result<Uuid, AppError> {
    Uuid::from_str(value.trim())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {}", field)))
}

/// Empty string means "not set".
pub fn parse_optional_uuid(field: &str, value: &str) -> Result<Option<Uuid>, AppError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_uuid(field, value).map(Some)
}

pub fn parse_optional_decimal(field: &str, value: &str) -> Result<Option<Decimal>, AppError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    Decimal::from_str(value.trim())
        .map(Some)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {}", field)))
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {}, expected YYYY-MM-DD", field)))
}

pub fn optional_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn invoice_status_from_proto(value: i32) -> Result<InvoiceStatus, AppError> {
    match proto::InvoiceStatus::try_from(value) {
        Ok(proto::InvoiceStatus::Draft) => Ok(InvoiceStatus::Draft),
        Ok(proto::InvoiceStatus::Submitted) => Ok(InvoiceStatus::Submitted),
        Ok(proto::InvoiceStatus::Approved) => Ok(InvoiceStatus::Approved),
        Ok(proto::InvoiceStatus::Paid) => Ok(InvoiceStatus::Paid),
        Ok(proto::InvoiceStatus::Rejected) => Ok(InvoiceStatus::Rejected),
        _ => Err(AppError::BadRequest(anyhow::anyhow!("Invalid status"))),
    }
}

// ============================================================================
// Responses
// ============================================================================

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn id_or_empty(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

fn decimal_or_empty(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl From<LrRequest> for proto::LrRequest {
    fn from(lr: LrRequest) -> Self {
        Self {
            lr_id: lr.lr_id.to_string(),
            lr_number: lr.lr_number,
            file_number: lr.file_number.unwrap_or_default(),
            vendor_id: lr.vendor_id.to_string(),
            origin: lr.origin.unwrap_or_default(),
            destination: lr.destination.unwrap_or_default(),
            remark: lr.remark.unwrap_or_default(),
            podlink: lr.podlink.unwrap_or_default(),
            lr_price: decimal_or_empty(lr.lr_price),
            price_settled: decimal_or_empty(lr.price_settled),
            extra_cost: lr.extra_cost.to_string(),
            is_invoiced: lr.is_invoiced,
            annexure_id: id_or_empty(lr.annexure_id),
            group_id: id_or_empty(lr.group_id),
            invoice_id: id_or_empty(lr.invoice_id),
            created_at: Some(datetime_to_timestamp(lr.created_utc)),
        }
    }
}

impl From<Annexure> for proto::Annexure {
    fn from(a: Annexure) -> Self {
        Self {
            annexure_id: a.annexure_id.to_string(),
            name: a.name,
            from_date: a.from_date.to_string(),
            vendor_id: id_or_empty(a.vendor_id),
            is_invoiced: a.is_invoiced,
            invoice_id: id_or_empty(a.invoice_id),
            created_at: Some(datetime_to_timestamp(a.created_utc)),
        }
    }
}

impl From<AnnexureFileGroup> for proto::FileGroup {
    fn from(g: AnnexureFileGroup) -> Self {
        Self {
            group_id: g.group_id.to_string(),
            annexure_id: g.annexure_id.to_string(),
            file_number: g.file_number,
            total_price: g.total_price.to_string(),
            extra_cost: g.extra_cost.to_string(),
        }
    }
}

impl From<FileMember> for proto::FileMember {
    fn from(m: FileMember) -> Self {
        Self {
            lr_number: m.lr_number,
            price: m.price.to_string(),
            extra_cost: m.extra_cost.to_string(),
            podlink: m.podlink.unwrap_or_default(),
            remark: m.remark.unwrap_or_default(),
        }
    }
}

impl From<AttachReport> for proto::AttachReport {
    fn from(r: AttachReport) -> Self {
        Self {
            added: r.added,
            missing_in_db: r.missing_in_db,
            already_annexured: r.already_annexured,
            already_invoiced: r.already_invoiced,
            missing_pod: r.missing_pod,
            duplicate_in_file: r.duplicate_in_file,
            created_groups: r.created_groups.into_iter().map(Into::into).collect(),
            no_file_number: r.no_file_number,
        }
    }
}

impl From<InvoiceStatus> for proto::InvoiceStatus {
    fn from(s: InvoiceStatus) -> Self {
        match s {
            InvoiceStatus::Draft => proto::InvoiceStatus::Draft,
            InvoiceStatus::Submitted => proto::InvoiceStatus::Submitted,
            InvoiceStatus::Approved => proto::InvoiceStatus::Approved,
            InvoiceStatus::Paid => proto::InvoiceStatus::Paid,
            InvoiceStatus::Rejected => proto::InvoiceStatus::Rejected,
        }
    }
}

impl From<InvoiceItem> for proto::InvoiceItem {
    fn from(i: InvoiceItem) -> Self {
        Self {
            item_id: i.item_id.to_string(),
            lr_id: i.lr_id.to_string(),
            lr_number: i.lr_number,
            file_number: i.file_number,
            description: i.description,
            quantity: i.quantity.to_string(),
            unit_price: i.unit_price.to_string(),
            extra_cost: i.extra_cost.to_string(),
            total: i.total.to_string(),
            sort_order: i.sort_order,
        }
    }
}

impl From<InvoiceDetail> for proto::Invoice {
    fn from(d: InvoiceDetail) -> Self {
        let status: proto::InvoiceStatus = d.invoice.status().into();
        Self {
            invoice_id: d.invoice.invoice_id.to_string(),
            invoice_number: d.invoice.invoice_number,
            vendor_id: d.invoice.vendor_id.to_string(),
            annexure_id: id_or_empty(d.invoice.annexure_id),
            status: status as i32,
            subtotal: d.invoice.subtotal.to_string(),
            tax_amount: d.invoice.tax_amount.to_string(),
            grand_total: d.invoice.grand_total.to_string(),
            items: d.items.into_iter().map(Into::into).collect(),
            created_at: Some(datetime_to_timestamp(d.invoice.created_utc)),
        }
    }
}

impl From<CostStatus> for proto::CostStatus {
    fn from(s: CostStatus) -> Self {
        match s {
            CostStatus::Matched => proto::CostStatus::Matched,
            CostStatus::Mismatch => proto::CostStatus::Mismatch,
            CostStatus::Missing => proto::CostStatus::Missing,
        }
    }
}

impl From<CostingRecord> for proto::CostingRecord {
    fn from(r: CostingRecord) -> Self {
        Self {
            lr_number: r.lr_number,
            charge_code: r.charge_code,
            allocated_cost: r.allocated_cost.to_string(),
            revenue: r.revenue.to_string(),
            gl_code: r.gl_code,
        }
    }
}

impl From<CostLine> for proto::CostLine {
    fn from(l: CostLine) -> Self {
        let status: proto::CostStatus = l.status.into();
        Self {
            lr_number: l.lr_number,
            file_number: l.file_number.unwrap_or_default(),
            billed: l.billed.to_string(),
            revenue: l.revenue.to_string(),
            allocated_cost: l.allocated_cost.to_string(),
            variance: l.variance.to_string(),
            status: status as i32,
            records: l.records.into_iter().map(Into::into).collect(),
        }
    }
}
