//! PostgreSQL Ledger Store.

use super::{
    clamp_page_size, AnnexureRepository, FileGroupRepository, InvoiceRepository, LedgerStore,
    LrRepository,
};
use crate::models::{
    Annexure, AnnexureFileGroup, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus,
    ListAnnexuresFilter, LrRequest, NewAnnexure, NewLrRequest,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const LR_COLUMNS: &str = "lr_id, lr_number, file_number, vendor_id, origin, destination, remark, podlink, lr_price, price_settled, extra_cost, is_invoiced, annexure_id, group_id, invoice_id, created_utc, updated_utc";
const ANNEXURE_COLUMNS: &str =
    "annexure_id, name, from_date, vendor_id, is_invoiced, invoice_id, created_utc, updated_utc";
const GROUP_COLUMNS: &str =
    "group_id, annexure_id, file_number, total_price, extra_cost, created_utc, updated_utc";
const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, vendor_id, annexure_id, status, subtotal, tax_amount, grand_total, created_utc, updated_utc";
const ITEM_COLUMNS: &str = "item_id, invoice_id, lr_id, lr_number, file_number, description, quantity, unit_price, extra_cost, total, sort_order, created_utc";

/// Predicate shared by every membership write: the LR is not invoiced.
const UNLOCKED: &str = "NOT is_invoiced AND invoice_id IS NULL";

const GROUP_UPSERT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    #[instrument(skip(database_url), fields(service = "annexure-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn unlink_where(&self, op: &str, predicate: &str, id: Uuid) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION.with_label_values(&[op]).start_timer();

        let sql = format!(
            "UPDATE lr_requests SET annexure_id = NULL, group_id = NULL, updated_utc = NOW() \
             WHERE {} AND {}",
            predicate, UNLOCKED
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to unlink LRs: {}", e)))?;

        timer.observe_duration();
        info!(operation = op, unlinked = result.rows_affected(), "LRs unlinked");

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LrRepository for PgLedgerStore {
    #[instrument(skip(self, lr), fields(lr_number = %lr.lr_number))]
    async fn insert_lr(&self, lr: &NewLrRequest) -> Result<LrRequest, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_lr"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO lr_requests (lr_id, lr_number, file_number, vendor_id, origin, destination, remark, podlink, lr_price, price_settled, extra_cost)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            LR_COLUMNS
        );
        let created = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(Uuid::new_v4())
            .bind(&lr.lr_number)
            .bind(&lr.file_number)
            .bind(lr.vendor_id)
            .bind(&lr.origin)
            .bind(&lr.destination)
            .bind(&lr.remark)
            .bind(&lr.podlink)
            .bind(lr.lr_price)
            .bind(lr.price_settled)
            .bind(lr.extra_cost)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!("LR '{}' already exists", lr.lr_number))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert LR: {}", e)),
            })?;

        timer.observe_duration();
        info!(lr_id = %created.lr_id, "LR recorded");

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_lr_by_number(&self, lr_number: &str) -> Result<Option<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_lr_by_number"])
            .start_timer();

        let sql = format!("SELECT {} FROM lr_requests WHERE lr_number = $1", LR_COLUMNS);
        let lr = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(lr_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get LR: {}", e)))?;

        timer.observe_duration();

        Ok(lr)
    }

    #[instrument(skip(self, lr_numbers), fields(count = lr_numbers.len()))]
    async fn find_lrs_by_numbers(&self, lr_numbers: &[String]) -> Result<Vec<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_lrs_by_numbers"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM lr_requests WHERE lr_number = ANY($1) ORDER BY lr_number",
            LR_COLUMNS
        );
        let lrs = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(lr_numbers)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get LRs: {}", e)))?;

        timer.observe_duration();

        Ok(lrs)
    }

    #[instrument(skip(self))]
    async fn find_lrs_by_file(&self, file_number: &str) -> Result<Vec<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_lrs_by_file"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM lr_requests WHERE file_number = $1 ORDER BY lr_number",
            LR_COLUMNS
        );
        let lrs = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(file_number)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get LRs for file: {}", e))
            })?;

        timer.observe_duration();

        Ok(lrs)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn find_lrs_by_annexure(&self, annexure_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_lrs_by_annexure"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM lr_requests WHERE annexure_id = $1 ORDER BY file_number, lr_number",
            LR_COLUMNS
        );
        let lrs = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(annexure_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get annexure members: {}", e))
            })?;

        timer.observe_duration();

        Ok(lrs)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn find_lrs_by_group(&self, group_id: Uuid) -> Result<Vec<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_lrs_by_group"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM lr_requests WHERE group_id = $1 ORDER BY lr_number",
            LR_COLUMNS
        );
        let lrs = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get group members: {}", e))
            })?;

        timer.observe_duration();

        Ok(lrs)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn count_lrs_in_annexure_file(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_lrs_in_annexure_file"])
            .start_timer();

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM lr_requests
            WHERE annexure_id = $1 AND file_number = $2
            "#,
        )
        .bind(annexure_id)
        .bind(file_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count LRs: {}", e)))?;

        timer.observe_duration();

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, podlink), fields(lr_id = %lr_id))]
    async fn set_podlink(&self, lr_id: Uuid, podlink: &str) -> Result<Option<LrRequest>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_podlink"])
            .start_timer();

        let sql = format!(
            "UPDATE lr_requests SET podlink = $2, updated_utc = NOW() \
             WHERE lr_id = $1 AND {} RETURNING {}",
            UNLOCKED, LR_COLUMNS
        );
        let lr = sqlx::query_as::<_, LrRequest>(&sql)
            .bind(lr_id)
            .bind(podlink)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to set POD: {}", e)))?;

        timer.observe_duration();

        Ok(lr)
    }

    #[instrument(skip(self), fields(lr_id = %lr_id, annexure_id = %annexure_id))]
    async fn link_lr(
        &self,
        lr_id: Uuid,
        annexure_id: Uuid,
        group_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["link_lr"])
            .start_timer();

        let sql = format!(
            "UPDATE lr_requests SET annexure_id = $2, group_id = $3, updated_utc = NOW() \
             WHERE lr_id = $1 AND annexure_id IS NULL AND group_id IS NULL AND {} \
             AND EXISTS (SELECT 1 FROM annexure_file_groups WHERE group_id = $3 AND annexure_id = $2)",
            UNLOCKED
        );
        let result = sqlx::query(&sql)
            .bind(lr_id)
            .bind(annexure_id)
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to link LR: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    async fn unlink_lr(&self, lr_id: Uuid) -> Result<u64, AppError> {
        self.unlink_where("unlink_lr", "lr_id = $1 AND annexure_id IS NOT NULL", lr_id)
            .await
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn unlink_file(&self, annexure_id: Uuid, file_number: &str) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unlink_file"])
            .start_timer();

        let sql = format!(
            "UPDATE lr_requests SET annexure_id = NULL, group_id = NULL, updated_utc = NOW() \
             WHERE annexure_id = $1 AND file_number = $2 AND {}",
            UNLOCKED
        );
        let result = sqlx::query(&sql)
            .bind(annexure_id)
            .bind(file_number)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to unlink file: {}", e)))?;

        timer.observe_duration();
        info!(file_number, unlinked = result.rows_affected(), "File unlinked");

        Ok(result.rows_affected())
    }

    async fn unlink_group(&self, group_id: Uuid) -> Result<u64, AppError> {
        self.unlink_where("unlink_group", "group_id = $1", group_id)
            .await
    }

    async fn unlink_annexure(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        self.unlink_where("unlink_annexure", "annexure_id = $1", annexure_id)
            .await
    }
}

#[async_trait]
impl AnnexureRepository for PgLedgerStore {
    #[instrument(skip(self, annexure), fields(name = %annexure.name))]
    async fn create_annexure(&self, annexure: &NewAnnexure) -> Result<Annexure, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_annexure"])
            .start_timer();

        let sql = format!(
            "INSERT INTO annexures (annexure_id, name, from_date, vendor_id) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ANNEXURE_COLUMNS
        );
        let created = sqlx::query_as::<_, Annexure>(&sql)
            .bind(Uuid::new_v4())
            .bind(&annexure.name)
            .bind(annexure.from_date)
            .bind(annexure.vendor_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create annexure: {}", e))
            })?;

        timer.observe_duration();
        info!(annexure_id = %created.annexure_id, "Annexure created");

        Ok(created)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn get_annexure(&self, annexure_id: Uuid) -> Result<Option<Annexure>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_annexure"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM annexures WHERE annexure_id = $1",
            ANNEXURE_COLUMNS
        );
        let annexure = sqlx::query_as::<_, Annexure>(&sql)
            .bind(annexure_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get annexure: {}", e)))?;

        timer.observe_duration();

        Ok(annexure)
    }

    #[instrument(skip(self))]
    async fn list_annexures(
        &self,
        filter: &ListAnnexuresFilter,
    ) -> Result<(Vec<Annexure>, Option<Uuid>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_annexures"])
            .start_timer();

        let limit = clamp_page_size(filter.page_size);

        let annexures = if let Some(cursor) = filter.page_token {
            let sql = format!(
                "SELECT {} FROM annexures WHERE annexure_id > $1 ORDER BY annexure_id LIMIT $2",
                ANNEXURE_COLUMNS
            );
            sqlx::query_as::<_, Annexure>(&sql)
                .bind(cursor)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await
        } else {
            let sql = format!(
                "SELECT {} FROM annexures ORDER BY annexure_id LIMIT $1",
                ANNEXURE_COLUMNS
            );
            sqlx::query_as::<_, Annexure>(&sql)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list annexures: {}", e)))?;

        timer.observe_duration();

        let has_more = annexures.len() > limit as usize;
        let mut annexures = annexures;
        if has_more {
            annexures.pop();
        }
        let next_token = if has_more {
            annexures.last().map(|a| a.annexure_id)
        } else {
            None
        };

        Ok((annexures, next_token))
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id, vendor_id = %vendor_id))]
    async fn adopt_vendor(&self, annexure_id: Uuid, vendor_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["adopt_vendor"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE annexures SET vendor_id = $2, updated_utc = NOW()
            WHERE annexure_id = $1 AND vendor_id IS NULL
            "#,
        )
        .bind(annexure_id)
        .bind(vendor_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to set vendor: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn delete_annexure(&self, annexure_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_annexure"])
            .start_timer();

        let result = sqlx::query("DELETE FROM annexures WHERE annexure_id = $1")
            .bind(annexure_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete annexure: {}", e))
            })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl FileGroupRepository for PgLedgerStore {
    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn insert_or_get_group(
        &self,
        annexure_id: Uuid,
        file_number: &str,
    ) -> Result<(AnnexureFileGroup, bool), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_or_get_group"])
            .start_timer();

        let insert = format!(
            "INSERT INTO annexure_file_groups (group_id, annexure_id, file_number) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (annexure_id, file_number) DO NOTHING \
             RETURNING {}",
            GROUP_COLUMNS
        );
        let select = format!(
            "SELECT {} FROM annexure_file_groups WHERE annexure_id = $1 AND file_number = $2",
            GROUP_COLUMNS
        );

        // The conflicting row can be deleted before the re-read sees it.
        let mut result = None;
        for attempt in 1..=GROUP_UPSERT_ATTEMPTS {
            let inserted = sqlx::query_as::<_, AnnexureFileGroup>(&insert)
                .bind(Uuid::new_v4())
                .bind(annexure_id)
                .bind(file_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to insert file group: {}", e))
                })?;
            if let Some(group) = inserted {
                result = Some((group, true));
                break;
            }

            let existing = sqlx::query_as::<_, AnnexureFileGroup>(&select)
                .bind(annexure_id)
                .bind(file_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to read file group: {}", e))
                })?;
            if let Some(group) = existing {
                result = Some((group, false));
                break;
            }
            debug!(attempt, file_number, "File group vanished before re-read, retrying");
        }

        let Some(result) = result else {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "File group {} is being modified concurrently",
                file_number
            )));
        };

        timer.observe_duration();

        Ok(result)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn get_group(&self, group_id: Uuid) -> Result<Option<AnnexureFileGroup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_group"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM annexure_file_groups WHERE group_id = $1",
            GROUP_COLUMNS
        );
        let group = sqlx::query_as::<_, AnnexureFileGroup>(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get file group: {}", e)))?;

        timer.observe_duration();

        Ok(group)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn list_groups(&self, annexure_id: Uuid) -> Result<Vec<AnnexureFileGroup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_groups"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM annexure_file_groups WHERE annexure_id = $1 ORDER BY file_number",
            GROUP_COLUMNS
        );
        let groups = sqlx::query_as::<_, AnnexureFileGroup>(&sql)
            .bind(annexure_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list file groups: {}", e))
            })?;

        timer.observe_duration();

        Ok(groups)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn refresh_group_totals(
        &self,
        group_id: Uuid,
    ) -> Result<Option<AnnexureFileGroup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["refresh_group_totals"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE annexure_file_groups g SET
                total_price = COALESCE(
                    (SELECT SUM(COALESCE(price_settled, lr_price, 0)) FROM lr_requests WHERE group_id = g.group_id), 0),
                extra_cost = COALESCE(
                    (SELECT SUM(extra_cost) FROM lr_requests WHERE group_id = g.group_id), 0),
                updated_utc = NOW()
            WHERE g.group_id = $1
            RETURNING {}
            "#,
            GROUP_COLUMNS
        );
        let group = sqlx::query_as::<_, AnnexureFileGroup>(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to refresh group totals: {}", e))
            })?;

        timer.observe_duration();

        Ok(group)
    }

    #[instrument(skip(self), fields(group_id = %group_id))]
    async fn delete_group_if_empty(&self, group_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_group_if_empty"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM annexure_file_groups
            WHERE group_id = $1
              AND NOT EXISTS (SELECT 1 FROM lr_requests WHERE group_id = $1)
            "#,
        )
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete file group: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    async fn delete_empty_groups(&self, annexure_id: Uuid) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_empty_groups"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM annexure_file_groups g
            WHERE g.annexure_id = $1
              AND NOT EXISTS (SELECT 1 FROM lr_requests l WHERE l.group_id = g.group_id)
            "#,
        )
        .bind(annexure_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete file groups: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InvoiceRepository for PgLedgerStore {
    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn create_invoices(&self, drafts: &[InvoiceDraft]) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoices"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice_sql = format!(
            "INSERT INTO invoices (invoice_id, invoice_number, vendor_id, annexure_id, status, subtotal, tax_amount, grand_total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            INVOICE_COLUMNS
        );
        let link_sql = format!(
            "UPDATE lr_requests SET is_invoiced = TRUE, invoice_id = $1, updated_utc = NOW() \
             WHERE lr_id = ANY($2) AND annexure_id IS NOT DISTINCT FROM $3 AND {}",
            UNLOCKED
        );

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let invoice = sqlx::query_as::<_, Invoice>(&invoice_sql)
                .bind(Uuid::new_v4())
                .bind(&draft.invoice_number)
                .bind(draft.vendor_id)
                .bind(draft.annexure_id)
                .bind(InvoiceStatus::Draft.as_str())
                .bind(draft.subtotal)
                .bind(draft.tax_amount)
                .bind(draft.grand_total)
                .fetch_one(&mut *tx)
                .await;
            let invoice = match invoice {
                Ok(invoice) => invoice,
                Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                    tx.rollback().await.ok();
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Invoice '{}' already exists",
                        draft.invoice_number
                    )));
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to create invoice: {}",
                        e
                    )));
                }
            };

            for item in &draft.items {
                let result = sqlx::query(
                    r#"
                    INSERT INTO invoice_items (item_id, invoice_id, lr_id, lr_number, file_number, description, quantity, unit_price, extra_cost, total, sort_order)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(invoice.invoice_id)
                .bind(item.lr_id)
                .bind(&item.lr_number)
                .bind(&item.file_number)
                .bind(&item.description)
                .bind(item.quantity)
                .bind(item.unit_price)
                .bind(item.extra_cost)
                .bind(item.total)
                .bind(item.sort_order)
                .execute(&mut *tx)
                .await;

                match result {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                        tx.rollback().await.ok();
                        return Err(AppError::Conflict(anyhow::anyhow!(
                            "LR '{}' is already invoiced",
                            item.lr_number
                        )));
                    }
                    Err(e) => {
                        tx.rollback().await.ok();
                        return Err(AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to create invoice item: {}",
                            e
                        )));
                    }
                }
            }

            let lr_ids = draft.lr_ids();
            let linked = sqlx::query(&link_sql)
                .bind(invoice.invoice_id)
                .bind(&lr_ids)
                .bind(draft.annexure_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to link LRs: {}", e))
                });
            let linked = match linked {
                Ok(result) => result.rows_affected(),
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(e);
                }
            };
            if linked != lr_ids.len() as u64 {
                tx.rollback().await.ok();
                warn!(
                    invoice_number = %draft.invoice_number,
                    expected = lr_ids.len(),
                    linked = linked,
                    "LR set changed during invoice generation"
                );
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "One or more LRs were invoiced concurrently"
                )));
            }

            if let Some(annexure_id) = draft.annexure_id {
                let closed = sqlx::query(
                    r#"
                    UPDATE annexures SET is_invoiced = TRUE, invoice_id = $2, updated_utc = NOW()
                    WHERE annexure_id = $1 AND NOT is_invoiced AND invoice_id IS NULL
                    "#,
                )
                .bind(annexure_id)
                .bind(invoice.invoice_id)
                .execute(&mut *tx)
                .await;
                match closed {
                    Ok(result) if result.rows_affected() == 1 => {}
                    Ok(_) => {
                        tx.rollback().await.ok();
                        return Err(AppError::Conflict(anyhow::anyhow!(
                            "Annexure already invoiced"
                        )));
                    }
                    Err(e) => {
                        tx.rollback().await.ok();
                        return Err(AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to close annexure: {}",
                            e
                        )));
                    }
                }
            }

            created.push(invoice);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(invoices = created.len(), "Invoices persisted");

        Ok(created)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let sql = format!("SELECT {} FROM invoices WHERE invoice_id = $1", INVOICE_COLUMNS);
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_items"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM invoice_items WHERE invoice_id = $1 ORDER BY sort_order",
            ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, InvoiceItem>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e))
            })?;

        timer.observe_duration();

        Ok(items)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id, from = from.as_str(), to = to.as_str()))]
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let sql = format!(
            "UPDATE invoices SET status = $3, updated_utc = NOW() \
             WHERE invoice_id = $1 AND status = $2 RETURNING {}",
            INVOICE_COLUMNS
        );
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
            })?;

        timer.observe_duration();

        Ok(invoice)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
