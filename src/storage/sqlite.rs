//! SQLite backend for movements, novelties and the persistent cache tier.

use super::{CacheStore, MovementStore};
use crate::models::{Movement, NoveltyPriority, NoveltyRecord, NoveltyStats, TribunalId};
use crate::{Error, Result};
use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Acquires the connection mutex with poison recovery.
///
/// If a previous critical section panicked, the connection state is still
/// valid; recover the guard and log rather than cascade the failure.
fn acquire_lock(mutex: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS movements (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    process_number  TEXT NOT NULL,
    tribunal        TEXT NOT NULL,
    movement_date   TEXT NOT NULL,
    code            TEXT,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    official        INTEGER NOT NULL DEFAULT 0,
    content_hash    TEXT NOT NULL,
    discovered_at   INTEGER NOT NULL,
    is_new          INTEGER NOT NULL DEFAULT 1,
    metadata        TEXT,
    UNIQUE(process_number, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_movements_process ON movements(process_number);

CREATE TABLE IF NOT EXISTS novelties (
    id              TEXT PRIMARY KEY,
    process_number  TEXT NOT NULL,
    movement_hash   TEXT NOT NULL,
    title           TEXT NOT NULL,
    tribunal        TEXT NOT NULL,
    priority        TEXT NOT NULL,
    tags            TEXT NOT NULL DEFAULT '[]',
    is_read         INTEGER NOT NULL DEFAULT 0,
    read_at         INTEGER,
    created_at      INTEGER NOT NULL,
    expires_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_novelties_unread ON novelties(is_read, expires_at);

CREATE TABLE IF NOT EXISTS cache_entries (
    key             TEXT PRIMARY KEY,
    process_number  TEXT NOT NULL,
    payload         TEXT NOT NULL,
    written_at      INTEGER NOT NULL,
    ttl_secs        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_process ON cache_entries(process_number);
";

/// SQLite-backed [`MovementStore`] and [`CacheStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage("open", e))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if schema initialization fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage("open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::storage("init_schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_movement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Movement> {
        let date: String = row.get("movement_date")?;
        let metadata: Option<String> = row.get("metadata")?;
        Ok(Movement {
            process_number: row.get("process_number")?,
            tribunal: TribunalId::new(row.get::<_, String>("tribunal")?),
            movement_date: date.parse().unwrap_or_default(),
            code: row.get("code")?,
            title: row.get("title")?,
            description: row.get("description")?,
            official: row.get::<_, i64>("official")? != 0,
            content_hash: row.get("content_hash")?,
            discovered_at: row.get::<_, i64>("discovered_at")?.unsigned_abs(),
            is_new: row.get::<_, i64>("is_new")? != 0,
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or(serde_json::Value::Null),
        })
    }

    fn row_to_novelty(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoveltyRecord> {
        let tags: String = row.get("tags")?;
        let priority: String = row.get("priority")?;
        Ok(NoveltyRecord {
            id: row.get("id")?,
            process_number: row.get("process_number")?,
            movement_hash: row.get("movement_hash")?,
            title: row.get("title")?,
            tribunal: TribunalId::new(row.get::<_, String>("tribunal")?),
            priority: NoveltyPriority::parse(&priority).unwrap_or_default(),
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            read: row.get::<_, i64>("is_read")? != 0,
            created_at: row.get::<_, i64>("created_at")?.unsigned_abs(),
            expires_at: row.get::<_, i64>("expires_at")?.unsigned_abs(),
        })
    }
}

impl MovementStore for SqliteStore {
    fn save_movements(&self, movements: &[Movement]) -> Result<usize> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::storage("save_movements", e))?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO movements
                     (process_number, tribunal, movement_date, code, title, description,
                      official, content_hash, discovered_at, is_new, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .map_err(|e| Error::storage("save_movements", e))?;
            for movement in movements {
                let metadata = if movement.metadata.is_null() {
                    None
                } else {
                    Some(movement.metadata.to_string())
                };
                inserted += stmt
                    .execute(params![
                        movement.process_number,
                        movement.tribunal.as_str(),
                        movement.movement_date.to_string(),
                        movement.code,
                        movement.title,
                        movement.description,
                        i64::from(movement.official),
                        movement.content_hash,
                        i64::try_from(movement.discovered_at).unwrap_or(i64::MAX),
                        i64::from(movement.is_new),
                        metadata,
                    ])
                    .map_err(|e| Error::storage("save_movements", e))?;
            }
        }
        tx.commit().map_err(|e| Error::storage("save_movements", e))?;
        Ok(inserted)
    }

    fn movements_for(&self, process_number: &str) -> Result<Vec<Movement>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM movements WHERE process_number = ?1
                 ORDER BY movement_date ASC, id ASC",
            )
            .map_err(|e| Error::storage("movements_for", e))?;
        let rows = stmt
            .query_map(params![process_number], Self::row_to_movement)
            .map_err(|e| Error::storage("movements_for", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage("movements_for", e))
    }

    fn known_hashes(&self, process_number: &str) -> Result<HashSet<String>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare("SELECT content_hash FROM movements WHERE process_number = ?1")
            .map_err(|e| Error::storage("known_hashes", e))?;
        let rows = stmt
            .query_map(params![process_number], |row| row.get::<_, String>(0))
            .map_err(|e| Error::storage("known_hashes", e))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(|e| Error::storage("known_hashes", e))
    }

    fn movement_count(&self) -> Result<u64> {
        let conn = acquire_lock(&self.conn);
        conn.query_row("SELECT COUNT(*) FROM movements", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(i64::unsigned_abs)
        .map_err(|e| Error::storage("movement_count", e))
    }

    fn save_novelty(&self, novelty: &NoveltyRecord) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO novelties
             (id, process_number, movement_hash, title, tribunal, priority, tags,
              is_read, read_at, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)",
            params![
                novelty.id,
                novelty.process_number,
                novelty.movement_hash,
                novelty.title,
                novelty.tribunal.as_str(),
                novelty.priority.as_str(),
                serde_json::to_string(&novelty.tags).unwrap_or_else(|_| "[]".to_string()),
                i64::from(novelty.read),
                i64::try_from(novelty.created_at).unwrap_or(i64::MAX),
                i64::try_from(novelty.expires_at).unwrap_or(i64::MAX),
            ],
        )
        .map_err(|e| Error::storage("save_novelty", e))?;
        Ok(())
    }

    fn unread_novelties(&self, limit: usize, now: u64) -> Result<Vec<NoveltyRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT * FROM novelties
                 WHERE is_read = 0 AND expires_at > ?1
                 ORDER BY created_at DESC, id ASC LIMIT ?2",
            )
            .map_err(|e| Error::storage("unread_novelties", e))?;
        let rows = stmt
            .query_map(
                params![
                    i64::try_from(now).unwrap_or(i64::MAX),
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                Self::row_to_novelty,
            )
            .map_err(|e| Error::storage("unread_novelties", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage("unread_novelties", e))
    }

    fn mark_read(&self, ids: &[String], now: u64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = acquire_lock(&self.conn);
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE novelties SET is_read = 1, read_at = ?1
             WHERE is_read = 0 AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::storage("mark_read", e))?;
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        values.push(&now);
        for id in ids {
            values.push(id);
        }
        stmt.execute(values.as_slice())
            .map_err(|e| Error::storage("mark_read", e))
    }

    fn mark_all_read(&self, now: u64) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "UPDATE novelties SET is_read = 1, read_at = ?1 WHERE is_read = 0",
            params![i64::try_from(now).unwrap_or(i64::MAX)],
        )
        .map_err(|e| Error::storage("mark_all_read", e))
    }

    fn novelty_stats(&self, now: u64) -> Result<NoveltyStats> {
        let conn = acquire_lock(&self.conn);
        let total = conn
            .query_row("SELECT COUNT(*) FROM novelties", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| Error::storage("novelty_stats", e))?;

        let mut stats = NoveltyStats {
            total: total.unsigned_abs(),
            ..NoveltyStats::default()
        };

        let mut stmt = conn
            .prepare(
                "SELECT priority, COUNT(*) FROM novelties
                 WHERE is_read = 0 AND expires_at > ?1 GROUP BY priority",
            )
            .map_err(|e| Error::storage("novelty_stats", e))?;
        let rows = stmt
            .query_map(params![i64::try_from(now).unwrap_or(i64::MAX)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::storage("novelty_stats", e))?;
        for row in rows {
            let (priority, count) = row.map_err(|e| Error::storage("novelty_stats", e))?;
            let count = count.unsigned_abs();
            stats.unread += count;
            stats.by_priority.insert(priority, count);
        }
        Ok(stats)
    }

    fn delete_expired_novelties(&self, now: u64) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM novelties WHERE expires_at <= ?1",
            params![i64::try_from(now).unwrap_or(i64::MAX)],
        )
        .map_err(|e| Error::storage("delete_expired_novelties", e))
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str, now: u64) -> Result<Option<String>> {
        let conn = acquire_lock(&self.conn);
        let result = conn.query_row(
            "SELECT payload FROM cache_entries
             WHERE key = ?1 AND written_at + ttl_secs > ?2",
            params![key, i64::try_from(now).unwrap_or(i64::MAX)],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(payload) => Ok(Some(payload)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::storage("cache_get", e)),
        }
    }

    fn put(
        &self,
        key: &str,
        process_number: &str,
        payload: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
             (key, process_number, payload, written_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                process_number,
                payload,
                i64::try_from(now).unwrap_or(i64::MAX),
                i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            ],
        )
        .map_err(|e| Error::storage("cache_put", e))?;
        Ok(())
    }

    fn invalidate_process(&self, process_number: &str) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM cache_entries WHERE process_number = ?1",
            params![process_number],
        )
        .map_err(|e| Error::storage("cache_invalidate", e))
    }

    fn evict_expired(&self, now: u64) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM cache_entries WHERE written_at + ttl_secs <= ?1",
            params![i64::try_from(now).unwrap_or(i64::MAX)],
        )
        .map_err(|e| Error::storage("cache_evict", e))
    }
}
