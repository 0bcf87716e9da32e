//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{FileRepo, FolderRepo, TransactionRepo};
use crate::store::MetadataStore;
use crate::tree_tx::TreeTransaction;
use async_trait::async_trait;
use canopy_core::TransactionStatus;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Startup connection policy: a bounded number of attempts with a fixed
/// delay between them.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        retry: ConnectRetry,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, retry).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        max_connections: u32,
        retry: ConnectRetry,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, retry).await
    }

    async fn connect(
        opts: PgConnectOptions,
        max_connections: u32,
        retry: ConnectRetry,
    ) -> MetadataResult<Self> {
        let attempts = retry.attempts.max(1);
        let mut attempt = 1;
        let pool = loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .connect_with(opts.clone())
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        backoff_ms = retry.backoff.as_millis() as u64,
                        error = %e,
                        "PostgreSQL connection failed, retrying"
                    );
                    tokio::time::sleep(retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "Giving up connecting to PostgreSQL");
                    return Err(e.into());
                }
            }
        };

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> MetadataResult<Box<dyn TreeTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTreeTransaction { tx }))
    }
}

#[async_trait]
impl FolderRepo for PostgresStore {
    async fn create_folder(&self, folder: &NewFolder) -> MetadataResult<FolderRow> {
        if folder.name.trim().is_empty() {
            return Err(MetadataError::InvalidArgument(
                "folder name must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        if let Some(parent_id) = folder.parent_id {
            let parent: Option<i64> =
                sqlx::query_scalar("SELECT id FROM folders WHERE id = $1 FOR SHARE")
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if parent.is_none() {
                return Err(MetadataError::NotFound(format!("folder {parent_id}")));
            }
        }

        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, FolderRow>(
            r#"
            INSERT INTO folders (owner_id, name, parent_id, size, created_at, updated_at)
            VALUES ($1, $2, $3, 0, $4, $4)
            RETURNING *
            "#,
        )
        .bind(folder.owner_id)
        .bind(&folder.name)
        .bind(folder.parent_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn get_folder(&self, id: i64) -> MetadataResult<Option<FolderRow>> {
        let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_children(&self, id: i64) -> MetadataResult<Vec<FolderRow>> {
        let rows =
            sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE parent_id = $1 ORDER BY id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn list_root_folders(&self, owner_id: i64) -> MetadataResult<Vec<FolderRow>> {
        let rows = sqlx::query_as::<_, FolderRow>(
            "SELECT * FROM folders WHERE owner_id = $1 AND parent_id IS NULL ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_files(&self, folder_id: i64) -> MetadataResult<Vec<FileRow>> {
        let rows =
            sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE folder_id = $1 ORDER BY id")
                .bind(folder_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TransactionRepo for PostgresStore {
    async fn create_transaction(
        &self,
        owner_id: i64,
        folder_id: i64,
    ) -> MetadataResult<UploadTransactionRow> {
        let mut tx = self.pool.begin().await?;
        let folder: Option<i64> =
            sqlx::query_scalar("SELECT id FROM folders WHERE id = $1 FOR SHARE")
                .bind(folder_id)
                .fetch_optional(&mut *tx)
                .await?;
        if folder.is_none() {
            return Err(MetadataError::NotFound(format!("folder {folder_id}")));
        }

        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, UploadTransactionRow>(
            r#"
            INSERT INTO upload_transactions (owner_id, folder_id, status, total_size, created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, $3, $3)
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(folder_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn get_transaction(&self, id: i64) -> MetadataResult<Option<UploadTransactionRow>> {
        let row = sqlx::query_as::<_, UploadTransactionRow>(
            "SELECT * FROM upload_transactions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_pending_transactions(
        &self,
        folder_id: i64,
    ) -> MetadataResult<Vec<UploadTransactionRow>> {
        let rows = sqlx::query_as::<_, UploadTransactionRow>(
            "SELECT * FROM upload_transactions WHERE folder_id = $1 AND status = 'pending' ORDER BY id",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fail_transaction(&self, id: i64) -> MetadataResult<UploadTransactionRow> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, UploadTransactionRow>(
            "SELECT * FROM upload_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| MetadataError::NotFound(format!("upload transaction {id}")))?;

        let from = current.status()?;
        if !from.can_transition_to(TransactionStatus::Failed) {
            return Err(MetadataError::Conflict(format!(
                "upload transaction {id} is already {from}, cannot become failed"
            )));
        }

        let recorded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE transaction_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if recorded > 0 {
            return Err(MetadataError::Conflict(format!(
                "upload transaction {id} has {recorded} recorded files and must be stopped instead"
            )));
        }

        let row = sqlx::query_as::<_, UploadTransactionRow>(
            r#"
            UPDATE upload_transactions SET status = 'failed', updated_at = $1
            WHERE id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            MetadataError::Conflict(format!("upload transaction {id} is no longer pending"))
        })?;
        tx.commit().await?;
        Ok(row)
    }
}

/// Unit of work on one PostgreSQL transaction.
struct PgTreeTransaction {
    tx: Transaction<'static, Postgres>,
}

fn require_row(rows_affected: u64, what: impl FnOnce() -> String) -> MetadataResult<()> {
    if rows_affected == 0 {
        Err(MetadataError::NotFound(what()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl TreeTransaction for PgTreeTransaction {
    async fn get_folder(&mut self, id: i64) -> MetadataResult<Option<FolderRow>> {
        let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn add_size(&mut self, id: i64, delta: i64) -> MetadataResult<()> {
        let result =
            sqlx::query("UPDATE folders SET size = size + $1, updated_at = $2 WHERE id = $3")
                .bind(delta)
                .bind(OffsetDateTime::now_utc())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
        require_row(result.rows_affected(), || format!("folder {id}"))
    }

    async fn set_size(&mut self, id: i64, size: i64) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE folders SET size = $1, updated_at = $2 WHERE id = $3")
            .bind(size)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        require_row(result.rows_affected(), || format!("folder {id}"))
    }

    async fn set_sizes(&mut self, sizes: &[FolderSize]) -> MetadataResult<u64> {
        let ids: Vec<i64> = sizes.iter().map(|entry| entry.id).collect();
        let values: Vec<i64> = sizes.iter().map(|entry| entry.size).collect();
        let result = sqlx::query(
            r#"
            UPDATE folders AS f
            SET size = v.size, updated_at = $3
            FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS v(id, size)
            WHERE f.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&values)
        .bind(OffsetDateTime::now_utc())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_parent(&mut self, id: i64, parent_id: i64) -> MetadataResult<()> {
        let result =
            sqlx::query("UPDATE folders SET parent_id = $1, updated_at = $2 WHERE id = $3")
                .bind(parent_id)
                .bind(OffsetDateTime::now_utc())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
        require_row(result.rows_affected(), || format!("folder {id}"))
    }

    async fn child_ids(&mut self, id: i64) -> MetadataResult<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM folders WHERE parent_id = $1 ORDER BY id")
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids)
    }

    async fn delete_folder_row(&mut self, id: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM folders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        require_row(result.rows_affected(), || format!("folder {id}"))
    }

    async fn insert_file(&mut self, file: &NewFile) -> MetadataResult<FileRow> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            INSERT INTO files (folder_id, owner_id, name, url, size, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(file.folder_id)
        .bind(file.owner_id)
        .bind(&file.name)
        .bind(&file.url)
        .bind(file.size)
        .bind(file.transaction_id)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn get_file(&mut self, id: i64) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn delete_file_row(&mut self, id: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        require_row(result.rows_affected(), || format!("file {id}"))
    }

    async fn set_file_folder(&mut self, id: i64, folder_id: i64) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE files SET folder_id = $1 WHERE id = $2")
            .bind(folder_id)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        require_row(result.rows_affected(), || format!("file {id}"))
    }

    async fn delete_files_in_folder(&mut self, folder_id: i64) -> MetadataResult<Vec<FileRow>> {
        let rows =
            sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE folder_id = $1 RETURNING *")
                .bind(folder_id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(rows)
    }

    async fn delete_files_for_transaction(
        &mut self,
        transaction_id: i64,
    ) -> MetadataResult<Vec<FileRow>> {
        let rows =
            sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE transaction_id = $1 RETURNING *")
                .bind(transaction_id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(rows)
    }

    async fn transaction_file_total(&mut self, transaction_id: i64) -> MetadataResult<i64> {
        // SUM(BIGINT) is NUMERIC in PostgreSQL.
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size), 0)::BIGINT FROM files WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(total)
    }

    async fn get_transaction(&mut self, id: i64) -> MetadataResult<Option<UploadTransactionRow>> {
        let row = sqlx::query_as::<_, UploadTransactionRow>(
            "SELECT * FROM upload_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn set_transaction_status(
        &mut self,
        id: i64,
        status: TransactionStatus,
        total_size: Option<i64>,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE upload_transactions
            SET status = $1, total_size = COALESCE($2, total_size), updated_at = $3
            WHERE id = $4 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(total_size)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::Conflict(format!(
                "upload transaction {id} is not pending"
            )));
        }
        Ok(())
    }

    async fn pending_transactions_in_folder(&mut self, folder_id: i64) -> MetadataResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM upload_transactions WHERE folder_id = $1 AND status = 'pending'",
        )
        .bind(folder_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn delete_transactions_in_folder(&mut self, folder_id: i64) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM upload_transactions WHERE folder_id = $1")
            .bind(folder_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
