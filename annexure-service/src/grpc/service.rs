//! gRPC service implementation for AnnexureService.

use crate::config::{InvoicingConfig, ReconciliationConfig};
use crate::grpc::convert::{
    invoice_status_from_proto, optional_string, parse_date, parse_optional_decimal,
    parse_optional_uuid, parse_uuid,
};
use crate::grpc::proto::*;
use crate::models::{
    AttachPod, CostStatus, ListAnnexuresFilter, NewAnnexure, NewLrRequest, RemovalOutcome,
};
use crate::services::{
    record_error, record_grpc_request, record_grpc_request_duration, CostReconciler,
    FileGroupResolver, InvoiceEngine, LrIntake, MembershipEngine, RevenueOracle,
};
use crate::store::SharedStore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

/// AnnexureService gRPC implementation.
pub struct AnnexureServiceImpl {
    resolver: FileGroupResolver,
    membership: MembershipEngine,
    intake: LrIntake,
    invoices: InvoiceEngine,
    reconciler: CostReconciler,
}

impl AnnexureServiceImpl {
    pub fn new(
        store: SharedStore,
        oracle: Arc<dyn RevenueOracle>,
        invoicing: InvoicingConfig,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        Self {
            resolver: FileGroupResolver::new(store.clone()),
            membership: MembershipEngine::new(store.clone()),
            intake: LrIntake::new(store.clone()),
            invoices: InvoiceEngine::new(store.clone(), invoicing),
            reconciler: CostReconciler::new(store, oracle, reconciliation),
        }
    }
}

/// Run a handler body, recording request metrics and mapping errors to `Status`.
async fn observe<T, F>(method: &'static str, body: F) -> Result<Response<T>, Status>
where
    F: Future<Output = Result<T, AppError>>,
{
    let start = Instant::now();
    let result = body.await;
    record_grpc_request_duration(method, start.elapsed().as_secs_f64());

    match result {
        Ok(message) => {
            record_grpc_request(method, "ok");
            Ok(Response::new(message))
        }
        Err(e) => {
            record_grpc_request(method, "error");
            record_error(e.kind());
            if e.is_expected() {
                tracing::info!(method = method, error = %e, "Request rejected");
            }
            Err(e.into())
        }
    }
}

#[tonic::async_trait]
impl annexure_service_server::AnnexureService for AnnexureServiceImpl {
    // =========================================================================
    // Annexure administration
    // =========================================================================

    async fn create_annexure(
        &self,
        request: Request<CreateAnnexureRequest>,
    ) -> Result<Response<CreateAnnexureResponse>, Status> {
        let req = request.into_inner();
        observe("create_annexure", async {
            let input = NewAnnexure {
                name: req.name,
                from_date: parse_date("from_date", &req.from_date)?,
                vendor_id: parse_optional_uuid("vendor_id", &req.vendor_id)?,
            };
            let annexure = self.membership.create_annexure(input).await?;
            Ok::<_, AppError>(CreateAnnexureResponse {
                annexure: Some(annexure.into()),
            })
        })
        .await
    }

    async fn get_annexure(
        &self,
        request: Request<GetAnnexureRequest>,
    ) -> Result<Response<GetAnnexureResponse>, Status> {
        let req = request.into_inner();
        observe("get_annexure", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let detail = self.membership.get_annexure(annexure_id).await?;
            Ok::<_, AppError>(GetAnnexureResponse {
                annexure: Some(detail.annexure.into()),
                groups: detail.groups.into_iter().map(Into::into).collect(),
                members: detail.members.into_iter().map(Into::into).collect(),
            })
        })
        .await
    }

    async fn list_annexures(
        &self,
        request: Request<ListAnnexuresRequest>,
    ) -> Result<Response<ListAnnexuresResponse>, Status> {
        let req = request.into_inner();
        observe("list_annexures", async {
            let filter = ListAnnexuresFilter {
                page_size: req.page_size,
                page_token: parse_optional_uuid("page_token", &req.page_token)?,
            };
            let (annexures, next) = self.membership.list_annexures(&filter).await?;
            Ok::<_, AppError>(ListAnnexuresResponse {
                annexures: annexures.into_iter().map(Into::into).collect(),
                next_page_token: next.map(|id| id.to_string()).unwrap_or_default(),
            })
        })
        .await
    }

    async fn delete_annexure(
        &self,
        request: Request<DeleteAnnexureRequest>,
    ) -> Result<Response<DeleteAnnexureResponse>, Status> {
        let req = request.into_inner();
        observe("delete_annexure", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let unlinked_count = self.membership.delete_annexure(annexure_id).await?;
            Ok::<_, AppError>(DeleteAnnexureResponse {
                success: true,
                unlinked_count,
            })
        })
        .await
    }

    // =========================================================================
    // LR intake
    // =========================================================================

    async fn submit_lr(
        &self,
        request: Request<SubmitLrRequest>,
    ) -> Result<Response<SubmitLrResponse>, Status> {
        let req = request.into_inner();
        observe("submit_lr", async {
            let input = NewLrRequest {
                lr_number: req.lr_number,
                file_number: optional_string(req.file_number),
                vendor_id: parse_uuid("vendor_id", &req.vendor_id)?,
                origin: optional_string(req.origin),
                destination: optional_string(req.destination),
                remark: optional_string(req.remark),
                podlink: optional_string(req.podlink),
                lr_price: parse_optional_decimal("lr_price", &req.lr_price)?,
                price_settled: parse_optional_decimal("price_settled", &req.price_settled)?,
                extra_cost: parse_optional_decimal("extra_cost", &req.extra_cost)?
                    .unwrap_or(Decimal::ZERO),
            };
            let lr = self.intake.submit_lr(input).await?;
            Ok::<_, AppError>(SubmitLrResponse {
                lr: Some(lr.into()),
            })
        })
        .await
    }

    async fn attach_pod(
        &self,
        request: Request<AttachPodRequest>,
    ) -> Result<Response<AttachPodResponse>, Status> {
        let req = request.into_inner();
        observe("attach_pod", async {
            let lr = self
                .intake
                .attach_pod(AttachPod {
                    lr_number: req.lr_number,
                    podlink: req.podlink,
                })
                .await?;
            Ok::<_, AppError>(AttachPodResponse {
                lr: Some(lr.into()),
            })
        })
        .await
    }

    // =========================================================================
    // Membership
    // =========================================================================

    async fn validate_file_for_annexure(
        &self,
        request: Request<ValidateFileForAnnexureRequest>,
    ) -> Result<Response<ValidateFileForAnnexureResponse>, Status> {
        let req = request.into_inner();
        observe("validate_file_for_annexure", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let validation = self
                .resolver
                .validate_file_for_annexure(&req.lr_number, annexure_id)
                .await?;
            Ok::<_, AppError>(ValidateFileForAnnexureResponse {
                file_number: validation.file_number,
                members: validation.members.into_iter().map(Into::into).collect(),
            })
        })
        .await
    }

    async fn attach_lrs(
        &self,
        request: Request<AttachLrsRequest>,
    ) -> Result<Response<AttachLrsResponse>, Status> {
        let req = request.into_inner();
        observe("attach_lrs", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let report = self
                .membership
                .attach_lrs(annexure_id, &req.lr_numbers)
                .await?;
            Ok::<_, AppError>(AttachLrsResponse {
                report: Some(report.into()),
            })
        })
        .await
    }

    async fn attach_file(
        &self,
        request: Request<AttachFileRequest>,
    ) -> Result<Response<AttachFileResponse>, Status> {
        let req = request.into_inner();
        observe("attach_file", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let (file_number, report) = self
                .membership
                .attach_file(annexure_id, &req.lr_number)
                .await?;
            Ok::<_, AppError>(AttachFileResponse {
                file_number,
                report: Some(report.into()),
            })
        })
        .await
    }

    async fn remove_lr(
        &self,
        request: Request<RemoveLrRequest>,
    ) -> Result<Response<RemoveLrResponse>, Status> {
        let req = request.into_inner();
        observe("remove_lr", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let outcome = self
                .membership
                .remove_lr(annexure_id, &req.lr_number, req.confirm_file_removal)
                .await?;
            Ok::<_, AppError>(match outcome {
                RemovalOutcome::Removed {
                    file_number,
                    removed_count,
                    ..
                } => RemoveLrResponse {
                    success: true,
                    removed_count,
                    requires_confirmation: false,
                    file_number: file_number.unwrap_or_default(),
                    affected_count: removed_count,
                },
                RemovalOutcome::RequiresConfirmation {
                    file_number,
                    affected_count,
                } => RemoveLrResponse {
                    success: false,
                    removed_count: 0,
                    requires_confirmation: true,
                    file_number,
                    affected_count,
                },
            })
        })
        .await
    }

    async fn delete_file_group(
        &self,
        request: Request<DeleteFileGroupRequest>,
    ) -> Result<Response<DeleteFileGroupResponse>, Status> {
        let req = request.into_inner();
        observe("delete_file_group", async {
            let group_id = parse_uuid("group_id", &req.group_id)?;
            let unlinked_count = self.membership.delete_group(group_id).await?;
            Ok::<_, AppError>(DeleteFileGroupResponse {
                success: true,
                unlinked_count,
            })
        })
        .await
    }

    async fn validate_existing_links(
        &self,
        request: Request<ValidateExistingLinksRequest>,
    ) -> Result<Response<ValidateExistingLinksResponse>, Status> {
        let req = request.into_inner();
        observe("validate_existing_links", async {
            let linked = self.membership.validate_existing(&req.lr_numbers).await?;
            Ok::<_, AppError>(ValidateExistingLinksResponse { linked })
        })
        .await
    }

    // =========================================================================
    // Invoicing
    // =========================================================================

    async fn generate_invoice_from_annexure(
        &self,
        request: Request<GenerateInvoiceFromAnnexureRequest>,
    ) -> Result<Response<GenerateInvoiceFromAnnexureResponse>, Status> {
        let req = request.into_inner();
        observe("generate_invoice_from_annexure", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let invoice = self.invoices.generate_from_annexure(annexure_id).await?;
            Ok::<_, AppError>(GenerateInvoiceFromAnnexureResponse {
                invoice: Some(invoice.into()),
            })
        })
        .await
    }

    async fn generate_invoices_from_files(
        &self,
        request: Request<GenerateInvoicesFromFilesRequest>,
    ) -> Result<Response<GenerateInvoicesFromFilesResponse>, Status> {
        let req = request.into_inner();
        observe("generate_invoices_from_files", async {
            if req.vendor_id.trim().is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!("vendor_id is required")));
            }
            let vendor_id = parse_uuid("vendor_id", &req.vendor_id)?;
            let invoices = self
                .invoices
                .generate_from_files(vendor_id, &req.file_numbers)
                .await?;
            Ok::<_, AppError>(GenerateInvoicesFromFilesResponse {
                invoices: invoices.into_iter().map(Into::into).collect(),
            })
        })
        .await
    }

    async fn get_invoice(
        &self,
        request: Request<GetInvoiceRequest>,
    ) -> Result<Response<GetInvoiceResponse>, Status> {
        let req = request.into_inner();
        observe("get_invoice", async {
            let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
            let invoice = self.invoices.get_invoice(invoice_id).await?;
            Ok::<_, AppError>(GetInvoiceResponse {
                invoice: Some(invoice.into()),
            })
        })
        .await
    }

    async fn update_invoice_status(
        &self,
        request: Request<UpdateInvoiceStatusRequest>,
    ) -> Result<Response<UpdateInvoiceStatusResponse>, Status> {
        let req = request.into_inner();
        observe("update_invoice_status", async {
            let invoice_id = parse_uuid("invoice_id", &req.invoice_id)?;
            let status = invoice_status_from_proto(req.status)?;
            let invoice = self
                .invoices
                .update_invoice_status(invoice_id, status)
                .await?;
            Ok::<_, AppError>(UpdateInvoiceStatusResponse {
                invoice: Some(invoice.into()),
            })
        })
        .await
    }

    // =========================================================================
    // Cost reconciliation
    // =========================================================================

    async fn reconcile_annexure_costs(
        &self,
        request: Request<ReconcileAnnexureCostsRequest>,
    ) -> Result<Response<ReconcileAnnexureCostsResponse>, Status> {
        let req = request.into_inner();
        observe("reconcile_annexure_costs", async {
            let annexure_id = parse_uuid("annexure_id", &req.annexure_id)?;
            let report = self.reconciler.reconcile_annexure(annexure_id).await?;
            Ok::<_, AppError>(ReconcileAnnexureCostsResponse {
                annexure_id: report.annexure_id.to_string(),
                matched: report.count(CostStatus::Matched) as u32,
                mismatched: report.count(CostStatus::Mismatch) as u32,
                missing: report.count(CostStatus::Missing) as u32,
                total_billed: report.total_billed.to_string(),
                total_revenue: report.total_revenue.to_string(),
                total_variance: report.total_variance.to_string(),
                lines: report.lines.into_iter().map(Into::into).collect(),
            })
        })
        .await
    }
}
