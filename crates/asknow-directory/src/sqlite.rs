//! Directory backed by the AskNow `SQLite` database.
//!
//! Reads the `users` and `questions` tables owned by the request/response
//! backend. The realtime server never writes to them, so connections are
//! opened read-only. Queries run on the blocking pool.

use std::path::Path;
use std::time::Duration;

use asknow_core::{Role, UserId};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde_json::{Value, json};
use tracing::debug;

use crate::errors::{DirectoryError, Result};
use crate::traits::{Identity, IdentityResolver, PendingItem, PendingItems};

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT_MS: u32 = 5_000;

const RESOLVE_SQL: &str = "SELECT role FROM users WHERE id = ?1 AND is_deleted = 0";

const PENDING_SQL: &str = "SELECT id, user_id, tutor_id, content, image_paths, status, created_at, updated_at \
     FROM questions \
     WHERE status = 'pending' AND is_deleted = 0 \
     ORDER BY created_at ASC, id ASC";

/// Pragmas applied to every pooled connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", self.busy_timeout_ms))
    }
}

/// Open a read-only pool over an existing database file.
pub fn new_file_pool(path: &Path) -> Result<ConnectionPool> {
    let manager = SqliteConnectionManager::file(path)
        .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI);
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: BUSY_TIMEOUT_MS,
        }))
        .build(manager)?;
    Ok(pool)
}

/// Identity and pending-item lookups against the AskNow database.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: ConnectionPool,
}

impl SqliteDirectory {
    /// Wrap an existing pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        debug!(?path, "opening directory database");
        Ok(Self::new(new_file_pool(path)?))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl IdentityResolver for SqliteDirectory {
    async fn resolve(&self, user_id: UserId) -> Result<Option<Identity>> {
        self.with_conn(move |conn| {
            let role: Option<String> = conn
                .query_row(RESOLVE_SQL, [user_id.get()], |row| row.get(0))
                .optional()?;
            role.map(|raw| {
                let role = raw.parse::<Role>().map_err(|_| {
                    DirectoryError::CorruptRow(format!("users.id={user_id} has role '{raw}'"))
                })?;
                Ok(Identity { user_id, role })
            })
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl PendingItems for SqliteDirectory {
    async fn pending_items(&self) -> Result<Vec<PendingItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(PENDING_SQL)?;
            let rows = stmt.query_map([], pending_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn pending_row(row: &Row<'_>) -> rusqlite::Result<PendingItem> {
    let id: i64 = row.get(0)?;
    let user_id: i64 = row.get(1)?;
    let tutor_id: Option<i64> = row.get(2)?;
    let content: String = row.get(3)?;
    let image_paths: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let updated_at: i64 = row.get(7)?;

    let payload = json!({
        "questionId": id,
        "userId": user_id,
        "tutorId": tutor_id,
        "content": content,
        "imagePaths": parse_image_paths(image_paths.as_deref()),
        "status": status,
        "createdAt": created_at,
        "updatedAt": updated_at,
    });

    Ok(PendingItem {
        id,
        payload,
        created_at,
    })
}

/// Image paths are stored as a JSON array in a text column. Anything
/// unparseable reads as empty.
fn parse_image_paths(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .map_or_else(|| json!([]), |paths| json!(paths))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
