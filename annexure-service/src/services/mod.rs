//! Services module for annexure-service.

pub mod file_resolver;
pub mod invoicing;
pub mod lr_intake;
pub mod membership;
pub mod metrics;
pub mod reconciliation;
pub mod revenue_oracle;

pub use file_resolver::{FileGroupResolver, ResolvedFile};
pub use invoicing::{InvoiceDetail, InvoiceEngine};
pub use lr_intake::LrIntake;
pub use membership::{AnnexureDetail, MembershipEngine};
pub use metrics::{
    get_metrics, init_metrics, record_error, record_grpc_request, record_grpc_request_duration,
};
pub use reconciliation::CostReconciler;
pub use revenue_oracle::{DisabledRevenueOracle, HttpRevenueOracle, RevenueOracle};
