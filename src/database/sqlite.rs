use super::{RecordQuery, ResultsStore, SessionState, StoreError, StoreStats};
use crate::core::category::Category;
use crate::core::classifier::{ClassificationRecord, CANDIDATE_THRESHOLD, HIGH_CONFIDENCE};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// File-backed results store. Records are kept as JSON alongside the columns
/// needed for filtering and statistics.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS classifications (
                asset_id TEXT PRIMARY KEY,
                analyzed_at TEXT NOT NULL,
                primary_category TEXT NOT NULL,
                confidence REAL NOT NULL,
                marked_for_deletion INTEGER NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL,
                record_json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_classifications_category
             ON classifications(primary_category, confidence)",
            [],
        )?;

        // single row, id pinned to 1
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision INTEGER NOT NULL,
                status TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn upsert_with(conn: &Connection, record: &ClassificationRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        conn.execute(
            "INSERT INTO classifications
             (asset_id, analyzed_at, primary_category, confidence, marked_for_deletion, file_size, record_json)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
             ON CONFLICT(asset_id) DO UPDATE SET
                analyzed_at = excluded.analyzed_at,
                primary_category = excluded.primary_category,
                confidence = excluded.confidence,
                file_size = excluded.file_size,
                record_json = excluded.record_json",
            params![
                record.asset_id,
                record.analyzed_at.to_rfc3339(),
                record.primary_category.as_str(),
                record.confidence,
                record.snapshot.file_size as i64,
                json,
            ],
        )?;
        Ok(())
    }

    fn write_session(conn: &Connection, state: &SessionState) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO session_state (id, revision, status, state_json, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                state.revision as i64,
                String::from(state.status),
                serde_json::to_string(state)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// The stored JSON is authoritative except for the user-owned mark column.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(String, bool)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn decode_record(json: &str, marked: bool) -> Result<ClassificationRecord, StoreError> {
    let mut record: ClassificationRecord = serde_json::from_str(json)?;
    record.marked_for_deletion = marked;
    Ok(record)
}

impl ResultsStore for SqliteStore {
    fn upsert(&self, record: &ClassificationRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Self::upsert_with(&conn, record)
    }

    fn upsert_batch(&self, records: &[ClassificationRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            Self::upsert_with(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, asset_id: &str) -> Result<Option<ClassificationRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT record_json, marked_for_deletion FROM classifications WHERE asset_id = ?1",
                params![asset_id],
                record_from_row,
            )
            .optional()?;

        row.map(|(json, marked)| decode_record(&json, marked))
            .transpose()
    }

    fn query(&self, query: &RecordQuery) -> Result<Vec<ClassificationRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_json, marked_for_deletion FROM classifications
             WHERE (?1 IS NULL OR primary_category = ?1)
               AND (?2 IS NULL OR confidence >= ?2)
             ORDER BY confidence DESC, asset_id ASC
             LIMIT ?3",
        )?;

        // LIMIT -1 means no limit in SQLite
        let limit = query.limit.map_or(-1, |l| l as i64);
        let rows = stmt.query_map(
            params![query.category.map(|c| c.as_str()), query.min_confidence, limit],
            record_from_row,
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (json, marked) = row?;
            records.push(decode_record(&json, marked)?);
        }
        Ok(records)
    }

    fn set_marked(&self, asset_ids: &[String], marked: bool) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        for id in asset_ids {
            changed += tx.execute(
                "UPDATE classifications SET marked_for_deletion = ?1 WHERE asset_id = ?2",
                params![marked, id],
            )?;
        }
        tx.commit()?;
        Ok(changed)
    }

    fn remove(&self, asset_ids: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for id in asset_ids {
            removed += tx.execute("DELETE FROM classifications WHERE asset_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        let mut stats = StoreStats::default();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM classifications", [], |row| row.get(0))?;
        stats.total = total as u64;

        let mut stmt = conn.prepare(
            "SELECT primary_category, COUNT(*) FROM classifications
             WHERE confidence >= ?1 GROUP BY primary_category",
        )?;
        let rows = stmt.query_map(params![CANDIDATE_THRESHOLD], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (category, count) = row?;
            match category.parse::<Category>() {
                Ok(category) => {
                    stats.candidates.insert(category, count as u64);
                }
                Err(e) => log::warn!("Skipping unknown category in store: {}", e),
            }
        }

        let high: i64 = conn.query_row(
            "SELECT COUNT(*) FROM classifications WHERE confidence > ?1",
            params![HIGH_CONFIDENCE],
            |row| row.get(0),
        )?;
        stats.high_confidence = high as u64;

        let (marked, marked_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0)
             FROM classifications WHERE marked_for_deletion = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.marked = marked as u64;
        stats.marked_bytes = marked_bytes as u64;

        Ok(stats)
    }

    fn get_session_state(&self) -> Result<Option<SessionState>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT state_json FROM session_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn put_session_state(&self, state: &SessionState) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Self::write_session(&conn, state)
    }

    fn compare_and_swap_session(
        &self,
        expected_revision: Option<u64>,
        state: &SessionState,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row("SELECT revision FROM session_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if current.map(|r| r as u64) != expected_revision {
            return Ok(false);
        }

        Self::write_session(&tx, state)?;
        tx.commit()?;
        Ok(true)
    }
}
