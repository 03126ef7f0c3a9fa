//! Vendor-side LR intake.

use crate::models::{normalize_lr_number, AttachPod, LrRequest, NewLrRequest};
use crate::store::SharedStore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Clone)]
pub struct LrIntake {
    store: SharedStore,
}

impl LrIntake {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, input), fields(lr_number = %input.lr_number))]
    pub async fn submit_lr(&self, input: NewLrRequest) -> Result<LrRequest, AppError> {
        let input = NewLrRequest {
            lr_number: normalize_lr_number(&input.lr_number),
            file_number: input
                .file_number
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            podlink: input.podlink.filter(|p| !p.trim().is_empty()),
            ..input
        };
        input.validate()?;

        let negative = [input.lr_price, input.price_settled, Some(input.extra_cost)]
            .into_iter()
            .flatten()
            .any(|v| v < Decimal::ZERO);
        if negative {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Prices must not be negative"
            )));
        }

        let lr = self.store.insert_lr(&input).await?;
        info!(lr_id = %lr.lr_id, "LR submitted");
        Ok(lr)
    }

    /// Record the POD URL returned by blob storage.
    #[instrument(skip(self, input), fields(lr_number = %input.lr_number))]
    pub async fn attach_pod(&self, input: AttachPod) -> Result<LrRequest, AppError> {
        input.validate()?;

        let lr = self
            .store
            .find_lr_by_number(&normalize_lr_number(&input.lr_number))
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("LR not found")))?;

        if lr.is_locked() {
            return Err(AppError::Conflict(anyhow::anyhow!("LR already invoiced")));
        }

        self.store
            .set_podlink(lr.lr_id, input.podlink.trim())
            .await?
            .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("LR already invoiced")))
    }
}
