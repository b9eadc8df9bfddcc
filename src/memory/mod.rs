//! Long-term memory store: key/value entries with ranked full-text recall.

pub mod sqlite;

pub use sqlite::SqliteMemory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default category applied when a store request names none.
pub const DEFAULT_CATEGORY: &str = "core";

/// A stored memory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: String,
    pub key: String,
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for [`Memory::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub category: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// The long-term memory contract.
///
/// `recall` is relevance-ranked, with a keyword-matching fallback when ranked
/// search yields nothing. Implementations are constructed explicitly and
/// passed in; there is no process-wide default store.
pub trait Memory: Send + Sync {
    /// Insert or update (by key) one entry.
    fn store(
        &self,
        key: &str,
        content: &str,
        category: &str,
        session_id: Option<&str>,
    ) -> Result<Entry>;

    /// Ranked search. `session_id` narrows the scope when given.
    fn recall(&self, query: &str, limit: usize, session_id: Option<&str>) -> Result<Vec<Entry>>;

    /// Exact key lookup.
    fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// List entries, most recently updated first.
    fn list(&self, filter: &ListFilter) -> Result<Vec<Entry>>;

    /// Delete by key; returns whether an entry existed.
    fn forget(&self, key: &str) -> Result<bool>;

    /// Total number of entries.
    fn count(&self) -> Result<u64>;
}
