//! SQLite storage backend for persistent caches.

use super::{BackendStats, StorageBackend, StoredRecord};
use crate::core::hasher::ContentHash;
use crate::error::StorageError;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// SQLite's default bound-parameter limit is 999 on older builds
const MAX_KEYS_PER_QUERY: usize = 500;

/// SQLite-backed persistent storage
///
/// Uses WAL (Write-Ahead Logging) mode so readers proceed while a write is
/// in flight. Keys are stored as lowercase hex.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Open or create a cache database at the given path
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StorageError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::initialize(conn, path.to_path_buf())
    }

    /// Private database that lives as long as the backend
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;
        Self::initialize(conn, PathBuf::from(":memory:"))
    }

    fn initialize(conn: Connection, db_path: PathBuf) -> Result<Self, StorageError> {
        let created = conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS entries (
                 key TEXT PRIMARY KEY,
                 payload BLOB NOT NULL,
                 raw_size INTEGER NOT NULL,
                 checksum INTEGER NOT NULL,
                 stored_at INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_entries_expires_at ON entries(expires_at);",
        );
        match created {
            Err(rusqlite::Error::SqliteFailure(error, _)) if error.code == ErrorCode::NotADatabase => {
                return Err(StorageError::Corrupted { path: db_path });
            }
            other => other?,
        }

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned { backend: "SQLite" })
    }

    fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Column order: key, payload, raw_size, checksum, stored_at, expires_at
    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Option<StoredRecord>> {
        let key: String = row.get(0)?;
        let Some(key) = ContentHash::from_hex(&key) else {
            return Ok(None);
        };
        Ok(Some(StoredRecord {
            key,
            payload: row.get(1)?,
            raw_size: row.get::<_, i64>(2)? as u64,
            checksum: row.get::<_, i64>(3)? as u64,
            stored_at: Self::from_millis(row.get(4)?),
            expires_at: Self::from_millis(row.get(5)?),
        }))
    }

    fn insert(conn: &Connection, record: &StoredRecord) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR REPLACE INTO entries
             (key, payload, raw_size, checksum, stored_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.key.to_hex(),
                record.payload,
                record.raw_size as i64,
                // Stored bit-for-bit; SQLite integers are signed
                record.checksum as i64,
                Self::to_millis(record.stored_at),
                Self::to_millis(record.expires_at),
            ],
        )
    }

    fn collect_keys(conn: &Connection, sql: &str, arg: Option<i64>) -> Result<Vec<ContentHash>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<String> = match arg {
            Some(value) => stmt
                .query_map([value], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
        };
        Ok(rows.iter().filter_map(|hex| ContentHash::from_hex(hex)).collect())
    }
}

impl StorageBackend for SqliteBackend {
    fn get(&self, key: &ContentHash) -> Result<Option<StoredRecord>, StorageError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT key, payload, raw_size, checksum, stored_at, expires_at
                 FROM entries WHERE key = ?",
                [key.to_hex()],
                Self::record_from_row,
            )
            .optional()?;
        Ok(record.flatten())
    }

    fn put(&self, record: StoredRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        Self::insert(&conn, &record)?;
        Ok(())
    }

    fn put_batch(&self, records: &[StoredRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            Self::insert(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_batch(&self, keys: &[ContentHash]) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.lock()?;
        let mut found = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(MAX_KEYS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT key, payload, raw_size, checksum, stored_at, expires_at
                 FROM entries WHERE key IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(chunk.iter().map(|k| k.to_hex())),
                Self::record_from_row,
            )?;
            for row in rows {
                if let Some(record) = row? {
                    found.push(record);
                }
            }
        }

        Ok(found)
    }

    fn remove(&self, key: &ContentHash) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM entries WHERE key = ?", [key.to_hex()])?;
        Ok(removed > 0)
    }

    fn keys(&self) -> Result<Vec<ContentHash>, StorageError> {
        let conn = self.lock()?;
        Self::collect_keys(&conn, "SELECT key FROM entries ORDER BY stored_at", None)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContentHash>, StorageError> {
        let mut conn = self.lock()?;
        let cutoff = Self::to_millis(now);

        // Immediate so no other connection writes between the select and the delete
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let purged = Self::collect_keys(&tx, "SELECT key FROM entries WHERE expires_at <= ?", Some(cutoff))?;
        tx.execute("DELETE FROM entries WHERE expires_at <= ?", [cutoff])?;
        tx.commit()?;
        Ok(purged)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries", [])?;
        Ok(())
    }

    fn stats(&self) -> Result<BackendStats, StorageError> {
        let conn = self.lock()?;
        let (entry_count, payload_bytes, raw_bytes) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0), COALESCE(SUM(raw_size), 0)
             FROM entries",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)? as u64,
                ))
            },
        )?;

        Ok(BackendStats {
            entry_count,
            payload_bytes,
            raw_bytes,
        })
    }
}
