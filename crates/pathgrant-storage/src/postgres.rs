//! PostgreSQL storage implementation.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, instrument};

use crate::error::{HealthStatus, PoolStats, StorageError, StorageResult};
use crate::model::{
    Mask, PathRef, PathType, PermissionKey, Sid, StorageId, StorageKind, StorageRef,
    StoredPermission, StoredProlongation,
};
use crate::traits::{
    dedup_last_wins, dedup_prolongations, validate_key, validate_path, validate_permission,
    validate_prolongation, validate_storage_id, PermissionStore,
};

/// Default health check timeout in seconds.
const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Matches a row at `$2` or anywhere beneath it, on segment boundaries.
const SUBTREE_PREDICATE: &str =
    "(path = $2 OR left(path, char_length($2) + 1) = ($2 || '/'))";

const PERMISSION_COLUMNS: &str = "p.path, p.path_type, p.sid_name, p.sid_type, p.mask, p.created";

fn query_error(context: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |e| StorageError::QueryError {
        message: format!("{context}: {e}"),
    }
}

fn parse_sid(row: &PgRow) -> StorageResult<Sid> {
    let name: String = row.try_get("sid_name").map_err(query_error("sid_name"))?;
    let sid_type: String = row.try_get("sid_type").map_err(query_error("sid_type"))?;
    Ok(Sid::new(name, sid_type.parse()?))
}

fn row_to_key(row: &PgRow) -> StorageResult<PermissionKey> {
    let path_type: String = row.try_get("path_type").map_err(query_error("path_type"))?;
    Ok(PermissionKey {
        path: row.try_get("path").map_err(query_error("path"))?,
        path_type: path_type.parse()?,
        sid: parse_sid(row)?,
    })
}

fn row_to_permission(row: &PgRow) -> StorageResult<StoredPermission> {
    let key = row_to_key(row)?;
    let mask: i64 = row.try_get("mask").map_err(query_error("mask"))?;
    let mask = u32::try_from(mask).map_err(|_| StorageError::QueryError {
        message: format!("stored mask out of range: {mask}"),
    })?;
    Ok(StoredPermission {
        path: key.path,
        path_type: key.path_type,
        sid: key.sid,
        mask: Mask::from_bits(mask),
        created: row.try_get("created").map_err(query_error("created"))?,
    })
}

fn row_to_prolongation(row: &PgRow) -> StorageResult<StoredProlongation> {
    let days: i32 = row.try_get("days").map_err(query_error("days"))?;
    Ok(StoredProlongation {
        storage_id: row.try_get("storage_id").map_err(query_error("storage_id"))?,
        path: row.try_get("path").map_err(query_error("path"))?,
        user_id: row.try_get("user_id").map_err(query_error("user_id"))?,
        prolonged_until: row
            .try_get("prolonged_until")
            .map_err(query_error("prolonged_until"))?,
        days: u32::try_from(days).map_err(|_| StorageError::QueryError {
            message: format!("stored prolongation days out of range: {days}"),
        })?,
        updated: row.try_get("updated").map_err(query_error("updated"))?,
    })
}

/// Column arrays for binding a sid list to `UNNEST`.
fn sid_arrays(sids: &[Sid]) -> (Vec<&str>, Vec<&str>) {
    let unique: BTreeSet<&Sid> = sids.iter().collect();
    unique
        .into_iter()
        .map(|sid| (sid.name.as_str(), sid.sid_type.as_str()))
        .unzip()
}

/// Column arrays for binding a `(path, type)` list to `UNNEST`.
fn path_arrays(paths: &[PathRef]) -> (Vec<&str>, Vec<&str>) {
    let unique: BTreeSet<&PathRef> = paths.iter().collect();
    unique
        .into_iter()
        .map(|p| (p.path.as_str(), p.path_type.as_str()))
        .unzip()
}

/// Serializes writers on one storage for the rest of the transaction.
async fn lock_storage(tx: &mut Transaction<'_, Postgres>, storage_id: StorageId) -> StorageResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(storage_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| StorageError::TransactionError {
            message: format!("failed to lock storage {storage_id}: {e}"),
        })?;
    Ok(())
}

/// Records the storage root, or checks the kind it was recorded with.
async fn ensure_storage(tx: &mut Transaction<'_, Postgres>, storage: &StorageRef) -> StorageResult<()> {
    sqlx::query("INSERT INTO storage_roots (id, kind) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
        .bind(storage.id)
        .bind(storage.kind.as_str())
        .execute(&mut **tx)
        .await
        .map_err(query_error("failed to register storage"))?;

    let registered: String = sqlx::query_scalar("SELECT kind FROM storage_roots WHERE id = $1")
        .bind(storage.id)
        .fetch_one(&mut **tx)
        .await
        .map_err(query_error("failed to read storage kind"))?;
    let registered: StorageKind = registered.parse()?;
    if registered != storage.kind {
        return Err(StorageError::StorageKindMismatch {
            storage_id: storage.id,
            registered,
            requested: storage.kind,
        });
    }
    Ok(())
}

async fn begin_locked(pool: &PgPool, storage_id: StorageId) -> StorageResult<Transaction<'static, Postgres>> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::TransactionError {
            message: format!("failed to begin transaction: {e}"),
        })?;
    lock_storage(&mut tx, storage_id).await?;
    Ok(tx)
}

async fn commit(tx: Transaction<'_, Postgres>) -> StorageResult<()> {
    tx.commit()
        .await
        .map_err(|e| StorageError::TransactionError {
            message: format!("failed to commit transaction: {e}"),
        })
}

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Default query timeout in seconds.
    ///
    /// A query exceeding this duration is cancelled and returns
    /// `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
    /// Timeout for read operations in seconds. Falls back to `query_timeout_secs`.
    pub read_timeout_secs: Option<u64>,
    /// Timeout for write transactions in seconds. Falls back to `query_timeout_secs`.
    pub write_timeout_secs: Option<u64>,
    /// Timeout for health checks in seconds.
    pub health_check_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .field("health_check_timeout_secs", &self.health_check_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/pathgrant".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            read_timeout_secs: None,
            write_timeout_secs: None,
            health_check_timeout_secs: DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
        }
    }
}

/// PostgreSQL implementation of [`PermissionStore`].
///
/// Every write runs in one transaction that first takes
/// `pg_advisory_xact_lock(storage_id)`, so writers on one storage are
/// serialized while other storages proceed in parallel. Readers rely on
/// transaction visibility and never see a half-applied write.
pub struct PostgresPermissionStore {
    pool: PgPool,
    read_timeout: Duration,
    write_timeout: Duration,
    health_check_timeout: Duration,
}

impl PostgresPermissionStore {
    /// Creates a store from an existing pool, using the default timeouts.
    pub fn new(pool: PgPool) -> Self {
        let default_timeout = Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS);
        Self {
            pool,
            read_timeout: default_timeout,
            write_timeout: default_timeout,
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        }
    }

    /// Connects a new pool with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        let default_timeout = Duration::from_secs(config.query_timeout_secs);
        Ok(Self {
            pool,
            read_timeout: config
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            write_timeout: config
                .write_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            health_check_timeout: Duration::from_secs(config.health_check_timeout_secs),
        })
    }

    /// Connects using a database URL and default settings.
    pub async fn from_url(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `pathgrant_storage_query_duration_seconds` - Histogram of query durations
    /// - `pathgrant_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout_and_metrics<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        future: F,
    ) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, future).await;
        let duration = start.elapsed().as_secs_f64();

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout,
                }),
            ),
        };

        metrics::histogram!(
            "pathgrant_storage_query_duration_seconds",
            "operation" => operation.to_string(),
            "backend" => "postgres",
            "status" => status
        )
        .record(duration);

        if status == "timeout" {
            metrics::counter!(
                "pathgrant_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }

    async fn execute_read<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.read_timeout, future)
            .await
    }

    /// On timeout the transaction is dropped and rolled back.
    async fn execute_write<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.write_timeout, future)
            .await
    }

    /// Creates tables and indexes. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        let statements: [(&str, &str); 5] = [
            (
                "storage_roots table",
                r#"
                CREATE TABLE IF NOT EXISTS storage_roots (
                    id BIGINT PRIMARY KEY,
                    kind VARCHAR(8) NOT NULL
                )
                "#,
            ),
            (
                "path_permissions table",
                r#"
                CREATE TABLE IF NOT EXISTS path_permissions (
                    storage_id BIGINT NOT NULL REFERENCES storage_roots(id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    path_type VARCHAR(8) NOT NULL,
                    sid_name VARCHAR(255) NOT NULL,
                    sid_type VARCHAR(8) NOT NULL,
                    mask BIGINT NOT NULL CHECK (mask > 0),
                    created TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (storage_id, path, path_type, sid_name, sid_type)
                )
                "#,
            ),
            (
                "sid index",
                r#"
                CREATE INDEX IF NOT EXISTS idx_path_permissions_sid
                ON path_permissions (sid_name, sid_type, storage_id)
                "#,
            ),
            (
                "path prefix index",
                r#"
                CREATE INDEX IF NOT EXISTS idx_path_permissions_prefix
                ON path_permissions (storage_id, path text_pattern_ops)
                "#,
            ),
            (
                "path_prolongations table",
                r#"
                CREATE TABLE IF NOT EXISTS path_prolongations (
                    storage_id BIGINT NOT NULL,
                    path TEXT NOT NULL,
                    user_id VARCHAR(255) NOT NULL,
                    prolonged_until TIMESTAMP WITH TIME ZONE NOT NULL,
                    days INTEGER NOT NULL CHECK (days > 0),
                    updated TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (storage_id, path)
                )
                "#,
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to create {name}: {e}"),
                })?;
        }

        debug!("Database migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    #[instrument(skip(self))]
    async fn register_storage(&self, storage: &StorageRef) -> StorageResult<()> {
        validate_storage_id(storage.id)?;
        self.execute_write("register_storage", async {
            let mut tx = begin_locked(&self.pool, storage.id).await?;
            ensure_storage(&mut tx, storage).await?;
            commit(tx).await
        })
        .await
    }

    async fn storage_kind(&self, storage_id: StorageId) -> StorageResult<Option<StorageKind>> {
        let kind: Option<String> = self
            .execute_read("storage_kind", async {
                sqlx::query_scalar("SELECT kind FROM storage_roots WHERE id = $1")
                    .bind(storage_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(query_error("failed to read storage kind"))
            })
            .await?;
        kind.map(|k| k.parse()).transpose()
    }

    #[instrument(skip(self, entries), fields(storage_id = storage.id, count = entries.len()))]
    async fn upsert_permissions(
        &self,
        storage: &StorageRef,
        entries: Vec<StoredPermission>,
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage.id)?;
        for entry in &entries {
            validate_permission(entry)?;
        }
        let entries = dedup_last_wins(entries);

        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        let path_types: Vec<&str> = entries.iter().map(|e| e.path_type.as_str()).collect();
        let sid_names: Vec<&str> = entries.iter().map(|e| e.sid.name.as_str()).collect();
        let sid_types: Vec<&str> = entries.iter().map(|e| e.sid.sid_type.as_str()).collect();
        let masks: Vec<i64> = entries.iter().map(|e| i64::from(e.mask.bits())).collect();
        let created: Vec<_> = entries.iter().map(|e| e.created).collect();

        self.execute_write("upsert_permissions", async {
            let mut tx = begin_locked(&self.pool, storage.id).await?;
            ensure_storage(&mut tx, storage).await?;
            if !entries.is_empty() {
                sqlx::query(
                    r#"
                    INSERT INTO path_permissions
                        (storage_id, path, path_type, sid_name, sid_type, mask, created)
                    SELECT $1, u.path, u.path_type, u.sid_name, u.sid_type, u.mask, u.created
                    FROM UNNEST($2::text[], $3::text[], $4::text[], $5::text[], $6::bigint[], $7::timestamptz[])
                        AS u(path, path_type, sid_name, sid_type, mask, created)
                    ON CONFLICT (storage_id, path, path_type, sid_name, sid_type)
                    DO UPDATE SET mask = EXCLUDED.mask, created = EXCLUDED.created
                    "#,
                )
                .bind(storage.id)
                .bind(&paths)
                .bind(&path_types)
                .bind(&sid_names)
                .bind(&sid_types)
                .bind(&masks)
                .bind(&created)
                .execute(&mut *tx)
                .await
                .map_err(query_error("failed to upsert permissions"))?;
            }
            commit(tx).await
        })
        .await?;

        Ok(entries)
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_permissions(
        &self,
        storage_id: StorageId,
        keys: Vec<PermissionKey>,
    ) -> StorageResult<Vec<PermissionKey>> {
        validate_storage_id(storage_id)?;
        for key in &keys {
            validate_key(key)?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let paths: Vec<&str> = keys.iter().map(|k| k.path.as_str()).collect();
        let path_types: Vec<&str> = keys.iter().map(|k| k.path_type.as_str()).collect();
        let sid_names: Vec<&str> = keys.iter().map(|k| k.sid.name.as_str()).collect();
        let sid_types: Vec<&str> = keys.iter().map(|k| k.sid.sid_type.as_str()).collect();

        let rows = self
            .execute_write("delete_permissions", async {
                let mut tx = begin_locked(&self.pool, storage_id).await?;
                let rows = sqlx::query(
                    r#"
                    DELETE FROM path_permissions p
                    USING UNNEST($2::text[], $3::text[], $4::text[], $5::text[])
                        AS d(path, path_type, sid_name, sid_type)
                    WHERE p.storage_id = $1
                      AND p.path = d.path
                      AND p.path_type = d.path_type
                      AND p.sid_name = d.sid_name
                      AND p.sid_type = d.sid_type
                    RETURNING p.path, p.path_type, p.sid_name, p.sid_type
                    "#,
                )
                .bind(storage_id)
                .bind(&paths)
                .bind(&path_types)
                .bind(&sid_names)
                .bind(&sid_types)
                .fetch_all(&mut *tx)
                .await
                .map_err(query_error("failed to delete permissions"))?;
                commit(tx).await?;
                Ok(rows)
            })
            .await?;

        rows.iter().map(row_to_key).collect()
    }

    async fn load_permissions(
        &self,
        storage_id: StorageId,
        paths: &[PathRef],
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage_id)?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let (query_paths, query_types) = path_arrays(paths);

        let sql = format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM path_permissions p
            JOIN UNNEST($2::text[], $3::text[]) AS q(path, path_type)
              ON p.path = q.path AND p.path_type = q.path_type
            WHERE p.storage_id = $1
            ORDER BY p.path, p.path_type, p.sid_type, p.sid_name
            "#
        );
        let rows = self
            .execute_read("load_permissions", async {
                sqlx::query(&sql)
                    .bind(storage_id)
                    .bind(&query_paths)
                    .bind(&query_types)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(query_error("failed to load permissions"))
            })
            .await?;

        rows.iter().map(row_to_permission).collect()
    }

    async fn find_applicable(
        &self,
        storage_id: StorageId,
        candidates: &[PathRef],
        sids: &[Sid],
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage_id)?;
        if candidates.is_empty() || sids.is_empty() {
            return Ok(Vec::new());
        }
        let (paths, path_types) = path_arrays(candidates);
        let (sid_names, sid_types) = sid_arrays(sids);

        let sql = format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM path_permissions p
            JOIN UNNEST($2::text[], $3::text[]) AS c(path, path_type)
              ON p.path = c.path AND p.path_type = c.path_type
            JOIN UNNEST($4::text[], $5::text[]) AS s(sid_name, sid_type)
              ON p.sid_name = s.sid_name AND p.sid_type = s.sid_type
            WHERE p.storage_id = $1
            "#
        );
        let rows = self
            .execute_read("find_applicable", async {
                sqlx::query(&sql)
                    .bind(storage_id)
                    .bind(&paths)
                    .bind(&path_types)
                    .bind(&sid_names)
                    .bind(&sid_types)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(query_error("failed to find applicable permissions"))
            })
            .await?;

        rows.iter().map(row_to_permission).collect()
    }

    #[instrument(skip(self, roots), fields(roots = roots.len()))]
    async fn delete_trees(
        &self,
        storage_id: StorageId,
        roots: &[PathRef],
    ) -> StorageResult<Vec<PermissionKey>> {
        validate_storage_id(storage_id)?;
        for root in roots {
            validate_path(&root.path)?;
        }
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        let root_paths: Vec<&str> = roots.iter().map(|r| r.path.as_str()).collect();
        let root_types: Vec<&str> = roots.iter().map(|r| r.path_type.as_str()).collect();

        let rows = self
            .execute_write("delete_trees", async {
                let mut tx = begin_locked(&self.pool, storage_id).await?;
                let rows = sqlx::query(
                    r#"
                    DELETE FROM path_permissions p
                    USING UNNEST($2::text[], $3::text[]) AS r(path, path_type)
                    WHERE p.storage_id = $1
                      AND (
                        (r.path_type = 'FOLDER'
                          AND (p.path = r.path
                               OR left(p.path, char_length(r.path) + 1) = (r.path || '/')))
                        OR (r.path_type = 'FILE' AND p.path = r.path AND p.path_type = 'FILE')
                      )
                    RETURNING p.path, p.path_type, p.sid_name, p.sid_type
                    "#,
                )
                .bind(storage_id)
                .bind(&root_paths)
                .bind(&root_types)
                .fetch_all(&mut *tx)
                .await
                .map_err(query_error("failed to delete permission trees"))?;
                commit(tx).await?;
                Ok(rows)
            })
            .await?;

        debug!(removed = rows.len(), "deleted permission trees");
        rows.iter().map(row_to_key).collect()
    }

    #[instrument(skip(self))]
    async fn move_tree(
        &self,
        storage_id: StorageId,
        source: &PathRef,
        destination: &PathRef,
    ) -> StorageResult<usize> {
        validate_storage_id(storage_id)?;
        validate_path(&source.path)?;
        validate_path(&destination.path)?;

        let occupied_sql = match destination.path_type {
            PathType::Folder => format!(
                "SELECT EXISTS(SELECT 1 FROM path_permissions WHERE storage_id = $1 AND {SUBTREE_PREDICATE})"
            ),
            PathType::File => "SELECT EXISTS(SELECT 1 FROM path_permissions \
                 WHERE storage_id = $1 AND path = $2 AND path_type = 'FILE')"
                .to_string(),
        };
        let update_sql = match source.path_type {
            PathType::Folder => format!(
                "UPDATE path_permissions SET path = $3 || substr(path, char_length($2) + 1) \
                 WHERE storage_id = $1 AND {SUBTREE_PREDICATE}"
            ),
            PathType::File => "UPDATE path_permissions SET path = $3 \
                 WHERE storage_id = $1 AND path = $2 AND path_type = 'FILE'"
                .to_string(),
        };

        let moved = self
            .execute_write("move_tree", async {
                let mut tx = begin_locked(&self.pool, storage_id).await?;
                let occupied: bool = sqlx::query_scalar(&occupied_sql)
                    .bind(storage_id)
                    .bind(&destination.path)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(query_error("failed to check move destination"))?;
                if occupied {
                    return Err(StorageError::DestinationOccupied {
                        storage_id,
                        path: destination.path.clone(),
                    });
                }
                let result = sqlx::query(&update_sql)
                    .bind(storage_id)
                    .bind(&source.path)
                    .bind(&destination.path)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_error("failed to move permission tree"))?;
                commit(tx).await?;
                Ok(result.rows_affected())
            })
            .await?;

        debug!(moved, "moved permission tree");
        usize::try_from(moved).map_err(|_| StorageError::InternalError {
            message: format!("moved row count out of range: {moved}"),
        })
    }

    async fn storages_with_grants(&self, sids: &[Sid]) -> StorageResult<Vec<StorageRef>> {
        if sids.is_empty() {
            return Ok(Vec::new());
        }
        let (sid_names, sid_types) = sid_arrays(sids);

        let rows = self
            .execute_read("storages_with_grants", async {
                sqlx::query(
                    r#"
                    SELECT r.id, r.kind
                    FROM storage_roots r
                    WHERE EXISTS (
                        SELECT 1
                        FROM path_permissions p
                        JOIN UNNEST($1::text[], $2::text[]) AS s(sid_name, sid_type)
                          ON p.sid_name = s.sid_name AND p.sid_type = s.sid_type
                        WHERE p.storage_id = r.id
                    )
                    ORDER BY r.id
                    "#,
                )
                .bind(&sid_names)
                .bind(&sid_types)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error("failed to list storages with grants"))
            })
            .await?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id").map_err(query_error("id"))?;
                let kind: String = row.try_get("kind").map_err(query_error("kind"))?;
                Ok(StorageRef::new(id, kind.parse()?))
            })
            .collect()
    }

    #[instrument(skip(self, prolongations), fields(count = prolongations.len()))]
    async fn upsert_prolongations(
        &self,
        storage_id: StorageId,
        prolongations: Vec<StoredProlongation>,
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        for prolongation in &prolongations {
            validate_prolongation(storage_id, prolongation)?;
        }
        let prolongations = dedup_prolongations(prolongations);
        if prolongations.is_empty() {
            return Ok(prolongations);
        }

        let paths: Vec<&str> = prolongations.iter().map(|p| p.path.as_str()).collect();
        let user_ids: Vec<&str> = prolongations.iter().map(|p| p.user_id.as_str()).collect();
        let until: Vec<_> = prolongations.iter().map(|p| p.prolonged_until).collect();
        let days = prolongations
            .iter()
            .map(|p| {
                i32::try_from(p.days).map_err(|_| StorageError::InvalidInput {
                    message: format!("prolongation days out of range: {}", p.days),
                })
            })
            .collect::<StorageResult<Vec<i32>>>()?;
        let updated: Vec<_> = prolongations.iter().map(|p| p.updated).collect();

        self.execute_write("upsert_prolongations", async {
            let mut tx = begin_locked(&self.pool, storage_id).await?;
            sqlx::query(
                r#"
                INSERT INTO path_prolongations
                    (storage_id, path, user_id, prolonged_until, days, updated)
                SELECT $1, u.path, u.user_id, u.prolonged_until, u.days, u.updated
                FROM UNNEST($2::text[], $3::text[], $4::timestamptz[], $5::int[], $6::timestamptz[])
                    AS u(path, user_id, prolonged_until, days, updated)
                ON CONFLICT (storage_id, path) DO UPDATE SET
                    user_id = EXCLUDED.user_id,
                    prolonged_until = EXCLUDED.prolonged_until,
                    days = EXCLUDED.days,
                    updated = EXCLUDED.updated
                "#,
            )
            .bind(storage_id)
            .bind(&paths)
            .bind(&user_ids)
            .bind(&until)
            .bind(&days)
            .bind(&updated)
            .execute(&mut *tx)
            .await
            .map_err(query_error("failed to upsert prolongations"))?;
            commit(tx).await
        })
        .await?;

        Ok(prolongations)
    }

    async fn find_prolongations(
        &self,
        storage_id: StorageId,
        paths: &[String],
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .execute_read("find_prolongations", async {
                sqlx::query(
                    "SELECT storage_id, path, user_id, prolonged_until, days, updated \
                     FROM path_prolongations WHERE storage_id = $1 AND path = ANY($2::text[])",
                )
                .bind(storage_id)
                .bind(paths)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error("failed to find prolongations"))
            })
            .await?;

        rows.iter().map(row_to_prolongation).collect()
    }

    async fn list_prolongations(
        &self,
        storage_id: StorageId,
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        let rows = self
            .execute_read("list_prolongations", async {
                sqlx::query(
                    "SELECT storage_id, path, user_id, prolonged_until, days, updated \
                     FROM path_prolongations WHERE storage_id = $1 ORDER BY path",
                )
                .bind(storage_id)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error("failed to list prolongations"))
            })
            .await?;

        rows.iter().map(row_to_prolongation).collect()
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let start = std::time::Instant::now();

        let check_result = tokio::time::timeout(self.health_check_timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::HealthCheckFailed {
                    message: format!("database ping failed: {e}"),
                })
        })
        .await;

        let latency = start.elapsed();
        let status = match &check_result {
            Ok(Ok(_)) => "success",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };

        metrics::histogram!(
            "pathgrant_storage_health_check_duration_seconds",
            "backend" => "postgres",
            "status" => status
        )
        .record(latency.as_secs_f64());

        match check_result {
            Ok(result) => {
                result?;
            }
            Err(_elapsed) => {
                metrics::counter!(
                    "pathgrant_storage_query_timeout_total",
                    "operation" => "health_check",
                    "backend" => "postgres"
                )
                .increment(1);
                return Err(StorageError::QueryTimeout {
                    operation: "health_check".to_string(),
                    timeout: self.health_check_timeout,
                });
            }
        }

        // pool.size() counts all connections, so active = size - idle
        let total_connections = self.pool.size();
        let idle_connections = self.pool.num_idle() as u32;
        let active_connections = total_connections.saturating_sub(idle_connections);
        let max_connections = self.pool.options().get_max_connections();

        Ok(HealthStatus {
            healthy: true,
            latency,
            pool_stats: Some(PoolStats {
                active_connections,
                idle_connections,
                max_connections,
            }),
            message: Some("postgresql".to_string()),
        })
    }
}

impl std::fmt::Debug for PostgresPermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPermissionStore")
            .field("pool", &"PgPool")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
