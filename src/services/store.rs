//! src/services/store.rs
//!
//! BucketStore: SQLite persistence for parsed buckets and their file
//! records. Buckets are upserted by URL; files are only ever bulk-inserted or
//! deleted per bucket.

use crate::models::{
    bucket::{Bucket, BucketSummary, BucketWithFiles, NewBucket},
    file::{FileQuery, FileRecord, FileSort, NewFile, SortOrder},
};
use chrono::Utc;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
};
use std::{io, path::Path, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const BUCKET_COLUMNS: &str =
    "id, url, base_url, max_keys, has_pagination, child_tags, created_at, last_updated";

const FILE_COLUMNS: &str = "id, bucket_id, fields, url, file_type, category";

/// Default number of buckets returned by [`BucketStore::list_recent_buckets`].
pub const RECENT_BUCKETS_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage not ready after {0:?}")]
    InitTimeout(Duration),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(Uuid),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Sqlx(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the bucket database. Cloning is cheap; all clones share one
/// pool. Only [`BucketStore::connect`] hands out handles, and only once the
/// schema is in place.
#[derive(Clone)]
pub struct BucketStore {
    pub db: Arc<SqlitePool>,
}

impl BucketStore {
    /// Open (creating if needed) the database at `database_url`, apply the
    /// schema and return a ready handle. Fails with `InitTimeout` if that
    /// takes longer than `init_timeout`.
    pub async fn connect(database_url: &str, init_timeout: Duration) -> StoreResult<Self> {
        tokio::time::timeout(init_timeout, Self::open(database_url))
            .await
            .map_err(|_| StoreError::InitTimeout(init_timeout))?
    }

    async fn open(database_url: &str) -> StoreResult<Self> {
        let in_memory = database_url.contains(":memory:");
        if !in_memory {
            ensure_parent_dir(database_url)?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is its own database, so pin the pool
        // to a single connection that never gets recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { db: Arc::new(pool) };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a bucket, or replace the newest bucket with the same URL.
    ///
    /// On replace, `created_at` and `id` are kept, `last_updated` is
    /// refreshed and every file of the old bucket is deleted. Runs in a
    /// single transaction.
    pub async fn upsert_bucket(&self, data: &NewBucket) -> StoreResult<Uuid> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM buckets WHERE url = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(&data.url)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE buckets
                     SET base_url = ?, max_keys = ?, has_pagination = ?, child_tags = ?,
                         last_updated = ?
                     WHERE id = ?",
                )
                .bind(&data.base_url)
                .bind(data.max_keys)
                .bind(data.has_pagination)
                .bind(Json(&data.child_tags))
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                let removed = sqlx::query("DELETE FROM files WHERE bucket_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                debug!(%id, removed = removed.rows_affected(), "replaced bucket");
                id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO buckets (id, url, base_url, max_keys, has_pagination,
                                          child_tags, created_at, last_updated)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&data.url)
                .bind(&data.base_url)
                .bind(data.max_keys)
                .bind(data.has_pagination)
                .bind(Json(&data.child_tags))
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                debug!(%id, url = %data.url, "created bucket");
                id
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    /// Remove every file of a bucket. A bucket with no files is a no-op.
    pub async fn delete_files_for_bucket(&self, bucket_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM files WHERE bucket_id = ?")
            .bind(bucket_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Append `files` to a bucket in one transaction. No deduplication.
    pub async fn insert_files(&self, bucket_id: Uuid, files: &[NewFile]) -> StoreResult<()> {
        if files.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        for file in files {
            sqlx::query(
                "INSERT INTO files (bucket_id, key, url, file_type, category, fields)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(bucket_id)
            .bind(file.key())
            .bind(&file.url)
            .bind(&file.file_type)
            .bind(file.category)
            .bind(Json(&file.fields))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count_files(&self, bucket_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE bucket_id = ?")
            .bind(bucket_id)
            .fetch_one(&*self.db)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get_bucket(&self, bucket_id: Uuid) -> StoreResult<Bucket> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {} FROM buckets WHERE id = ?",
            BUCKET_COLUMNS
        ))
        .bind(bucket_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(StoreError::BucketNotFound(bucket_id))
    }

    /// A bucket and all of its files, in insertion order.
    pub async fn get_bucket_with_files(&self, bucket_id: Uuid) -> StoreResult<BucketWithFiles> {
        let bucket = self.get_bucket(bucket_id).await?;
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE bucket_id = ? ORDER BY id ASC",
            FILE_COLUMNS
        ))
        .bind(bucket_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(BucketWithFiles { bucket, files })
    }

    /// Most recently created buckets first, each with its current file count.
    pub async fn list_recent_buckets(&self, limit: u32) -> StoreResult<Vec<BucketSummary>> {
        let rows = sqlx::query_as::<_, BucketSummary>(
            "SELECT b.id, b.url, b.base_url, b.max_keys, b.has_pagination, b.child_tags,
                    b.created_at, b.last_updated,
                    (SELECT COUNT(*) FROM files f WHERE f.bucket_id = b.id) AS file_count
             FROM buckets b
             ORDER BY b.created_at DESC, b.rowid DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Filtered, sorted view over a bucket's files.
    pub async fn query_files(
        &self,
        bucket_id: Uuid,
        query: &FileQuery,
    ) -> StoreResult<Vec<FileRecord>> {
        // Surface a missing bucket instead of an empty list.
        self.get_bucket(bucket_id).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM files WHERE bucket_id = ",
            FILE_COLUMNS
        ));
        builder.push_bind(bucket_id);

        if let Some(category) = query.category {
            builder.push(" AND category = ");
            builder.push_bind(category);
        }

        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                builder.push(" AND instr(lower(key), ");
                builder.push_bind(search.to_lowercase());
                builder.push(") > 0");
            }
        }

        let column = match query.sort {
            FileSort::Name => "key",
            FileSort::Size => "CAST(json_extract(fields, '$.Size') AS INTEGER)",
            FileSort::Modified => "json_extract(fields, '$.LastModified')",
            FileSort::Type => "file_type",
        };
        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        builder.push(format!(" ORDER BY {} {}, id {}", column, direction, direction));

        if query.limit.is_some() || query.offset.is_some() {
            builder.push(" LIMIT ");
            builder.push_bind(query.limit.map(i64::from).unwrap_or(-1));
            builder.push(" OFFSET ");
            builder.push_bind(i64::from(query.offset.unwrap_or(0)));
        }

        let rows: Vec<FileRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    /// Drop every bucket and file.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        let files = sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        let buckets = sqlx::query("DELETE FROM buckets").execute(&mut *tx).await?;
        tx.commit().await?;
        info!(
            buckets = buckets.rows_affected(),
            files = files.rows_affected(),
            "cleared bucket history"
        );
        Ok(())
    }

    /// Cheap connectivity check used by readiness probes.
    pub async fn ping(&self) -> StoreResult<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if one != 1 {
            return Err(StoreError::Unavailable(format!("unexpected result: {}", one)));
        }
        Ok(())
    }
}

/// Create the directory holding a file-backed SQLite database.
fn ensure_parent_dir(database_url: &str) -> io::Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::Category;
    use std::collections::BTreeMap;

    async fn memory_store() -> BucketStore {
        BucketStore::connect("sqlite::memory:", Duration::from_secs(10))
            .await
            .unwrap()
    }

    fn new_bucket(url: &str) -> NewBucket {
        NewBucket {
            url: url.to_string(),
            base_url: "https://example.com/".to_string(),
            max_keys: 1000,
            has_pagination: false,
            child_tags: vec!["Key".into(), "Size".into(), "LastModified".into()],
        }
    }

    fn file(key: &str, size: &str, modified: &str) -> NewFile {
        let contents: BTreeMap<String, String> = [
            ("Key".to_string(), key.to_string()),
            ("Size".to_string(), size.to_string()),
            ("LastModified".to_string(), modified.to_string()),
        ]
        .into_iter()
        .collect();
        NewFile::from_contents(
            &contents,
            &["Key".into(), "Size".into(), "LastModified".into()],
            "https://example.com/b/",
        )
    }

    #[tokio::test]
    async fn upsert_reuses_id_and_created_at() {
        let store = memory_store().await;
        let first = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        let before = store.get_bucket(first).await.unwrap();

        store
            .insert_files(first, &[file("a.png", "1", "2024-01-01")])
            .await
            .unwrap();

        let mut changed = new_bucket("https://example.com/b/");
        changed.max_keys = 2;
        let second = store.upsert_bucket(&changed).await.unwrap();
        let after = store.get_bucket(second).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(before.created_at, after.created_at);
        assert!(after.last_updated > before.last_updated);
        assert_eq!(after.max_keys, 2);
        assert_eq!(store.count_files(first).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn distinct_urls_get_distinct_buckets() {
        let store = memory_store().await;
        let a = store.upsert_bucket(&new_bucket("https://example.com/a/")).await.unwrap();
        let b = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        assert_ne!(a, b);

        let recent = store.list_recent_buckets(RECENT_BUCKETS_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].bucket.id, b);
        assert_eq!(recent[1].bucket.child_tags, vec!["Key", "Size", "LastModified"]);
    }

    #[tokio::test]
    async fn insert_count_and_read_back_in_order() {
        let store = memory_store().await;
        let id = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        let files = vec![file("z.txt", "3", "2024-03-01"), file("a.txt", "1", "2024-01-01")];
        store.insert_files(id, &files).await.unwrap();
        store.insert_files(id, &files[..1]).await.unwrap();

        assert_eq!(store.count_files(id).await.unwrap(), 3);
        let data = store.get_bucket_with_files(id).await.unwrap();
        let keys: Vec<&str> = data.files.iter().map(|f| f.fields["Key"].as_str()).collect();
        assert_eq!(keys, vec!["z.txt", "a.txt", "z.txt"]);
        assert_eq!(data.files[0].bucket_id, id);
        assert_eq!(data.files[0].url, "https://example.com/b/z.txt");
        assert_eq!(data.files[0].category, Some(Category::Documents));

        let recent = store.list_recent_buckets(10).await.unwrap();
        assert_eq!(recent[0].file_count, 3);
    }

    #[tokio::test]
    async fn delete_files_is_noop_when_empty() {
        let store = memory_store().await;
        let id = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        assert_eq!(store.delete_files_for_bucket(id).await.unwrap(), 0);
        store.insert_files(id, &[file("a", "1", "x")]).await.unwrap();
        assert_eq!(store.delete_files_for_bucket(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = memory_store().await;
        let err = store.get_bucket_with_files(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn query_filters_and_sorts() {
        let store = memory_store().await;
        let id = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        store
            .insert_files(
                id,
                &[
                    file("Photos/b.PNG", "200", "2024-02-01T00:00:00Z"),
                    file("photos/a.png", "30", "2024-03-01T00:00:00Z"),
                    file("docs/c.pdf", "1000", "2024-01-01T00:00:00Z"),
                    file("docs/", "0", "2024-01-01T00:00:00Z"),
                ],
            )
            .await
            .unwrap();

        let images = store
            .query_files(
                id,
                &FileQuery {
                    category: Some(Category::Images),
                    sort: FileSort::Size,
                    ..FileQuery::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<&str> = images.iter().map(|f| f.fields["Key"].as_str()).collect();
        assert_eq!(keys, vec!["photos/a.png", "Photos/b.PNG"]);

        let searched = store
            .query_files(
                id,
                &FileQuery {
                    search: Some("PHOTOS".into()),
                    sort: FileSort::Modified,
                    order: SortOrder::Desc,
                    ..FileQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(searched[0].fields["Key"], "photos/a.png");
        assert_eq!(searched.len(), 2);

        let page = store
            .query_files(
                id,
                &FileQuery {
                    limit: Some(1),
                    offset: Some(1),
                    ..FileQuery::default()
                },
            )
            .await
            .unwrap();
        // Keys compare bytewise, so "Photos/..." sorts before "docs/".
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].fields["Key"], "docs/");

        let folders = store
            .query_files(
                id,
                &FileQuery {
                    category: Some(Category::Folders),
                    ..FileQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_empties_both_tables() {
        let store = memory_store().await;
        let id = store.upsert_bucket(&new_bucket("https://example.com/b/")).await.unwrap();
        store.insert_files(id, &[file("a", "1", "x")]).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.list_recent_buckets(10).await.unwrap().is_empty());
        assert_eq!(store.count_files(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_backed_database_creates_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("viewer.db");
        let url = format!("sqlite://{}", path.display());
        let store = BucketStore::connect(&url, Duration::from_secs(10)).await.unwrap();
        store.ping().await.unwrap();
        assert!(path.exists());
    }
}
