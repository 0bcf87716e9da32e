//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::models::FolderRow;
use crate::repos::{FileRepo, FolderRepo, TransactionRepo};
use crate::tree_tx::TreeTransaction;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FolderRepo + FileRepo + TransactionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Open a unit of work on the folder tree.
    async fn begin(&self) -> MetadataResult<Box<dyn TreeTransaction>>;

    /// The folder and its ancestors, root first, read in a unit of work of
    /// its own.
    async fn parent_chain(&self, folder_id: i64) -> MetadataResult<Vec<FolderRow>> {
        let mut tx = self.begin().await?;
        let chain = crate::tree::parent_chain(tx.as_mut(), folder_id).await?;
        tx.commit().await?;
        Ok(chain)
    }
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES folders(id),
        size INTEGER NOT NULL DEFAULT 0 CHECK (size >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_folders_owner_root ON folders(owner_id) WHERE parent_id IS NULL",
    r#"
    CREATE TABLE IF NOT EXISTS upload_transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        folder_id INTEGER NOT NULL REFERENCES folders(id),
        status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
        total_size INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_upload_transactions_folder ON upload_transactions(folder_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_id INTEGER NOT NULL REFERENCES folders(id),
        owner_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        size INTEGER NOT NULL CHECK (size >= 0),
        transaction_id INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_transaction ON files(transaction_id) WHERE transaction_id IS NOT NULL",
];

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) a SQLite store and run migrations.
    ///
    /// `:memory:` gives a private in-memory database, which lives as long as
    /// the store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection serializes writers, so concurrent walks over a shared
        // ancestor chain never interleave. It also keeps `:memory:` alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in SQLITE_SCHEMA {
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
        Ok(Box::new(sqlite_impl::SqliteTreeTransaction { tx }))
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::MetadataError;
    use crate::models::{FileRow, FolderSize, NewFile, NewFolder, UploadTransactionRow};
    use canopy_core::TransactionStatus;
    use sqlx::Transaction;
    use time::OffsetDateTime;

    // SQLite caps bound parameters per statement; three per batch entry.
    const SIZE_BATCH: usize = 300;

    fn require_row(rows_affected: u64, what: impl FnOnce() -> String) -> MetadataResult<()> {
        if rows_affected == 0 {
            Err(MetadataError::NotFound(what()))
        } else {
            Ok(())
        }
    }

    #[async_trait]
    impl FolderRepo for SqliteStore {
        async fn create_folder(&self, folder: &NewFolder) -> MetadataResult<FolderRow> {
            if folder.name.trim().is_empty() {
                return Err(MetadataError::InvalidArgument(
                    "folder name must not be empty".to_string(),
                ));
            }

            let mut tx = self.pool.begin().await?;
            if let Some(parent_id) = folder.parent_id {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM folders WHERE id = ?)")
                        .bind(parent_id)
                        .fetch_one(&mut *tx)
                        .await?;
                if !exists {
                    return Err(MetadataError::NotFound(format!("folder {parent_id}")));
                }
            }

            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, FolderRow>(
                r#"
                INSERT INTO folders (owner_id, name, parent_id, size, created_at, updated_at)
                VALUES (?, ?, ?, 0, ?, ?)
                RETURNING *
                "#,
            )
            .bind(folder.owner_id)
            .bind(&folder.name)
            .bind(folder.parent_id)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn get_folder(&self, id: i64) -> MetadataResult<Option<FolderRow>> {
            let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_children(&self, id: i64) -> MetadataResult<Vec<FolderRow>> {
            let rows = sqlx::query_as::<_, FolderRow>(
                "SELECT * FROM folders WHERE parent_id = ? ORDER BY id",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_root_folders(&self, owner_id: i64) -> MetadataResult<Vec<FolderRow>> {
            let rows = sqlx::query_as::<_, FolderRow>(
                "SELECT * FROM folders WHERE owner_id = ? AND parent_id IS NULL ORDER BY id",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_files(&self, folder_id: i64) -> MetadataResult<Vec<FileRow>> {
            let rows =
                sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE folder_id = ? ORDER BY id")
                    .bind(folder_id)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TransactionRepo for SqliteStore {
        async fn create_transaction(
            &self,
            owner_id: i64,
            folder_id: i64,
        ) -> MetadataResult<UploadTransactionRow> {
            let mut tx = self.pool.begin().await?;
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM folders WHERE id = ?)")
                    .bind(folder_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if !exists {
                return Err(MetadataError::NotFound(format!("folder {folder_id}")));
            }

            let now = OffsetDateTime::now_utc();
            let row = sqlx::query_as::<_, UploadTransactionRow>(
                r#"
                INSERT INTO upload_transactions (owner_id, folder_id, status, total_size, created_at, updated_at)
                VALUES (?, ?, 'pending', 0, ?, ?)
                RETURNING *
                "#,
            )
            .bind(owner_id)
            .bind(folder_id)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(row)
        }

        async fn get_transaction(&self, id: i64) -> MetadataResult<Option<UploadTransactionRow>> {
            let row = sqlx::query_as::<_, UploadTransactionRow>(
                "SELECT * FROM upload_transactions WHERE id = ?",
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
                "SELECT * FROM upload_transactions WHERE folder_id = ? AND status = 'pending' ORDER BY id",
            )
            .bind(folder_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn fail_transaction(&self, id: i64) -> MetadataResult<UploadTransactionRow> {
            let mut tx = self.pool.begin().await?;
            let current = sqlx::query_as::<_, UploadTransactionRow>(
                "SELECT * FROM upload_transactions WHERE id = ?",
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
                sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE transaction_id = ?")
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
                UPDATE upload_transactions SET status = 'failed', updated_at = ?
                WHERE id = ? AND status = 'pending'
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

    /// Unit of work on one SQLite transaction.
    pub(super) struct SqliteTreeTransaction {
        pub(super) tx: Transaction<'static, Sqlite>,
    }

    #[async_trait]
    impl TreeTransaction for SqliteTreeTransaction {
        async fn get_folder(&mut self, id: i64) -> MetadataResult<Option<FolderRow>> {
            let row = sqlx::query_as::<_, FolderRow>("SELECT * FROM folders WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
            Ok(row)
        }

        async fn add_size(&mut self, id: i64, delta: i64) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE folders SET size = size + ?, updated_at = ? WHERE id = ?")
                    .bind(delta)
                    .bind(OffsetDateTime::now_utc())
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await?;
            require_row(result.rows_affected(), || format!("folder {id}"))
        }

        async fn set_size(&mut self, id: i64, size: i64) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE folders SET size = ?, updated_at = ? WHERE id = ?")
                .bind(size)
                .bind(OffsetDateTime::now_utc())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            require_row(result.rows_affected(), || format!("folder {id}"))
        }

        async fn set_sizes(&mut self, sizes: &[FolderSize]) -> MetadataResult<u64> {
            let now = OffsetDateTime::now_utc();
            let mut updated = 0;
            for batch in sizes.chunks(SIZE_BATCH) {
                let cases = " WHEN ? THEN ?".repeat(batch.len());
                let placeholders = vec!["?"; batch.len()].join(", ");
                let query = format!(
                    "UPDATE folders SET size = CASE id{cases} ELSE size END, updated_at = ? \
                     WHERE id IN ({placeholders})"
                );

                let mut q = sqlx::query(&query);
                for entry in batch {
                    q = q.bind(entry.id).bind(entry.size);
                }
                q = q.bind(now);
                for entry in batch {
                    q = q.bind(entry.id);
                }
                updated += q.execute(&mut *self.tx).await?.rows_affected();
            }
            Ok(updated)
        }

        async fn set_parent(&mut self, id: i64, parent_id: i64) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE folders SET parent_id = ?, updated_at = ? WHERE id = ?")
                    .bind(parent_id)
                    .bind(OffsetDateTime::now_utc())
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await?;
            require_row(result.rows_affected(), || format!("folder {id}"))
        }

        async fn child_ids(&mut self, id: i64) -> MetadataResult<Vec<i64>> {
            let ids = sqlx::query_scalar("SELECT id FROM folders WHERE parent_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&mut *self.tx)
                .await?;
            Ok(ids)
        }

        async fn delete_folder_row(&mut self, id: i64) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM folders WHERE id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            require_row(result.rows_affected(), || format!("folder {id}"))
        }

        async fn insert_file(&mut self, file: &NewFile) -> MetadataResult<FileRow> {
            let row = sqlx::query_as::<_, FileRow>(
                r#"
                INSERT INTO files (folder_id, owner_id, name, url, size, transaction_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
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
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
            Ok(row)
        }

        async fn delete_file_row(&mut self, id: i64) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            require_row(result.rows_affected(), || format!("file {id}"))
        }

        async fn set_file_folder(&mut self, id: i64, folder_id: i64) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE files SET folder_id = ? WHERE id = ?")
                .bind(folder_id)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            require_row(result.rows_affected(), || format!("file {id}"))
        }

        async fn delete_files_in_folder(&mut self, folder_id: i64) -> MetadataResult<Vec<FileRow>> {
            let rows =
                sqlx::query_as::<_, FileRow>("DELETE FROM files WHERE folder_id = ? RETURNING *")
                    .bind(folder_id)
                    .fetch_all(&mut *self.tx)
                    .await?;
            Ok(rows)
        }

        async fn delete_files_for_transaction(
            &mut self,
            transaction_id: i64,
        ) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "DELETE FROM files WHERE transaction_id = ? RETURNING *",
            )
            .bind(transaction_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn transaction_file_total(&mut self, transaction_id: i64) -> MetadataResult<i64> {
            let total: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(size), 0) FROM files WHERE transaction_id = ?",
            )
            .bind(transaction_id)
            .fetch_one(&mut *self.tx)
            .await?;
            Ok(total)
        }

        async fn get_transaction(
            &mut self,
            id: i64,
        ) -> MetadataResult<Option<UploadTransactionRow>> {
            let row = sqlx::query_as::<_, UploadTransactionRow>(
                "SELECT * FROM upload_transactions WHERE id = ?",
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
                SET status = ?, total_size = COALESCE(?, total_size), updated_at = ?
                WHERE id = ? AND status = 'pending'
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
                "SELECT COUNT(*) FROM upload_transactions WHERE folder_id = ? AND status = 'pending'",
            )
            .bind(folder_id)
            .fetch_one(&mut *self.tx)
            .await?;
            Ok(count)
        }

        async fn delete_transactions_in_folder(&mut self, folder_id: i64) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM upload_transactions WHERE folder_id = ?")
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
}
