//! SQLite-backed memory with an FTS5 index for ranked recall.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{Entry, ListFilter, Memory, DEFAULT_CATEGORY};
use crate::error::{PalaverError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id          TEXT PRIMARY KEY,
    key         TEXT NOT NULL UNIQUE,
    content     TEXT NOT NULL,
    category    TEXT NOT NULL DEFAULT 'core',
    session_id  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    key, content, content=memories, content_rowid=rowid
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, key, content)
    VALUES (new.rowid, new.key, new.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, key, content)
    VALUES ('delete', old.rowid, old.key, old.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, key, content)
    VALUES ('delete', old.rowid, old.key, old.content);
    INSERT INTO memories_fts(rowid, key, content)
    VALUES (new.rowid, new.key, new.content);
END;
";

pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    /// Open (or create) the database under `data_dir/memory.db`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("memory.db");
        debug!(path = %path.display(), "opening memory database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PalaverError::Memory("memory lock poisoned".to_string()))
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let created: String = row.get("created_at")?;
    let updated: String = row.get("updated_at")?;
    Ok(Entry {
        id: row.get("id")?,
        key: row.get("key")?,
        content: row.get("content")?,
        category: row.get("category")?,
        session_id: row.get("session_id")?,
        score: None,
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    })
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Quote each term so user input cannot inject FTS5 query syntax.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Memory for SqliteMemory {
    fn store(
        &self,
        key: &str,
        content: &str,
        category: &str,
        session_id: Option<&str>,
    ) -> Result<Entry> {
        if key.is_empty() {
            return Err(PalaverError::InvalidArgument("memory key is required".into()));
        }
        let category = if category.is_empty() {
            DEFAULT_CATEGORY
        } else {
            category
        };
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO memories (id, key, content, category, session_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                 content = excluded.content,
                 category = excluded.category,
                 session_id = excluded.session_id,
                 updated_at = excluded.updated_at",
            params![
                id,
                key,
                content,
                category,
                session_id,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        // The insert id is discarded on upsert; read the row back.
        let entry = conn
            .query_row("SELECT * FROM memories WHERE key = ?1", params![key], row_to_entry)?;
        Ok(entry)
    }

    fn recall(&self, query: &str, limit: usize, session_id: Option<&str>) -> Result<Vec<Entry>> {
        let limit = if limit == 0 { 5 } else { limit };
        let conn = self.lock()?;

        let fts = fts_query(query);
        let mut entries: Vec<Entry> = Vec::new();
        if !fts.is_empty() {
            let mut stmt = conn.prepare(
                "SELECT m.*, bm25(memories_fts) AS rank
                 FROM memories_fts
                 JOIN memories m ON m.rowid = memories_fts.rowid
                 WHERE memories_fts MATCH ?1
                   AND (?2 IS NULL OR m.session_id = ?2)
                 ORDER BY rank
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![fts, session_id, limit as i64], |row| {
                let mut entry = row_to_entry(row)?;
                let rank: f64 = row.get("rank")?;
                // bm25 is smaller-is-better; flip it for a natural score.
                entry.score = Some(-rank);
                Ok(entry)
            })?;
            for row in rows {
                entries.push(row?);
            }
        }

        if entries.is_empty() {
            // Keyword fallback for queries FTS tokenization misses.
            let pattern = format!("%{}%", query.trim());
            let mut stmt = conn.prepare(
                "SELECT * FROM memories
                 WHERE (key LIKE ?1 OR content LIKE ?1)
                   AND (?2 IS NULL OR session_id = ?2)
                 ORDER BY updated_at DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![pattern, session_id, limit as i64], row_to_entry)?;
            for row in rows {
                entries.push(row?);
            }
        }

        Ok(entries)
    }

    fn get(&self, key: &str) -> Result<Option<Entry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row("SELECT * FROM memories WHERE key = ?1", params![key], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        let limit = filter.limit.unwrap_or(100) as i64;
        let mut stmt = conn.prepare(
            "SELECT * FROM memories
             WHERE (?1 IS NULL OR category = ?1)
               AND (?2 IS NULL OR session_id = ?2)
             ORDER BY updated_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![filter.category, filter.session_id, limit],
            row_to_entry,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn forget(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM memories WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> SqliteMemory {
        SqliteMemory::open_in_memory().unwrap()
    }

    #[test]
    fn store_then_get_round_trips() {
        let mem = mem();
        let entry = mem
            .store("user.name", "Ada Lovelace", "core", None)
            .unwrap();
        assert_eq!(entry.key, "user.name");

        let got = mem.get("user.name").unwrap().unwrap();
        assert_eq!(got.content, "Ada Lovelace");
        assert_eq!(got.category, "core");
        assert!(mem.get("missing").unwrap().is_none());
    }

    #[test]
    fn store_upserts_by_key() {
        let mem = mem();
        mem.store("k", "first", "core", None).unwrap();
        mem.store("k", "second", "daily", None).unwrap();
        assert_eq!(mem.count().unwrap(), 1);
        let entry = mem.get("k").unwrap().unwrap();
        assert_eq!(entry.content, "second");
        assert_eq!(entry.category, "daily");
    }

    #[test]
    fn recall_ranks_matches() {
        let mem = mem();
        mem.store("lang", "Rust is a systems language", "core", None)
            .unwrap();
        mem.store("pet", "The cat is named Mochi", "core", None)
            .unwrap();
        let hits = mem.recall("rust systems", 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "lang");
        assert!(hits[0].score.is_some());
    }

    #[test]
    fn recall_falls_back_to_keyword_match() {
        let mem = mem();
        mem.store("id", "ticket ABC-123", "core", None).unwrap();
        // "BC-1" is a substring FTS tokenization won't match.
        let hits = mem.recall("BC-1", 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "id");
    }

    #[test]
    fn recall_scopes_by_session() {
        let mem = mem();
        mem.store("a", "shared topic alpha", "core", Some("s1")).unwrap();
        mem.store("b", "shared topic alpha", "core", Some("s2")).unwrap();
        let hits = mem.recall("alpha", 5, Some("s1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
    }

    #[test]
    fn forget_reports_existence() {
        let mem = mem();
        mem.store("gone", "soon", "core", None).unwrap();
        assert!(mem.forget("gone").unwrap());
        assert!(!mem.forget("gone").unwrap());
        assert_eq!(mem.count().unwrap(), 0);
    }

    #[test]
    fn list_filters_by_category() {
        let mem = mem();
        mem.store("a", "one", "core", None).unwrap();
        mem.store("b", "two", "daily", None).unwrap();
        let filter = ListFilter {
            category: Some("daily".into()),
            ..Default::default()
        };
        let entries = mem.list(&filter).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "b");
    }
}
