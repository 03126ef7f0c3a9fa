//! File-group resolution: from one LR number to the whole file it belongs to.

use crate::models::{normalize_lr_number, FileMember, FileValidation, LrRequest};
use crate::store::SharedStore;
use service_core::error::AppError;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A file that passed validation, with its full member rows.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file_number: String,
    pub members: Vec<LrRequest>,
}

impl From<ResolvedFile> for FileValidation {
    fn from(file: ResolvedFile) -> Self {
        Self {
            file_number: file.file_number,
            members: file.members.iter().map(FileMember::from).collect(),
        }
    }
}

#[derive(Clone)]
pub struct FileGroupResolver {
    store: SharedStore,
}

impl FileGroupResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Check whether the file owning `lr_number` may be attached to the annexure.
    pub async fn validate_file_for_annexure(
        &self,
        lr_number: &str,
        annexure_id: Uuid,
    ) -> Result<FileValidation, AppError> {
        self.resolve(lr_number, annexure_id).await.map(Into::into)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn resolve(&self, lr_number: &str, annexure_id: Uuid) -> Result<ResolvedFile, AppError> {
        if self.store.get_annexure(annexure_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!("Annexure not found")));
        }

        let lr_number = normalize_lr_number(lr_number);
        let lr = self
            .store
            .find_lr_by_number(&lr_number)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("LR not found")))?;

        let file_number = lr
            .file()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidState(anyhow::anyhow!("No file number assigned")))?;

        let members = self.store.find_lrs_by_file(&file_number).await?;

        if let Some(other) = members
            .iter()
            .filter_map(|m| m.annexure_id)
            .find(|id| *id != annexure_id)
        {
            let name = self
                .store
                .get_annexure(other)
                .await?
                .map(|a| a.name)
                .unwrap_or_else(|| other.to_string());
            return Err(AppError::Conflict(anyhow::anyhow!(
                "file already belongs to annexure {}",
                name
            )));
        }

        if members.iter().any(LrRequest::is_locked) {
            return Err(AppError::Conflict(anyhow::anyhow!("already invoiced")));
        }

        if members.iter().all(|m| m.annexure_id == Some(annexure_id)) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "file already in this annexure"
            )));
        }

        debug!(file_number = %file_number, members = members.len(), "File validated");

        Ok(ResolvedFile {
            file_number,
            members,
        })
    }
}
