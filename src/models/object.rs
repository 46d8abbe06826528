//! Raw objects as the store reports them, before any photo parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single entry returned by a list call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: Option<i64>,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size_bytes: Option<i64>) -> Self {
        Self {
            key: key.into(),
            size_bytes,
        }
    }
}

/// One page of a prefix listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    /// Entries in ascending lexical key order.
    pub entries: Vec<ObjectEntry>,

    /// Whether more entries exist past this page.
    pub is_truncated: bool,

    /// Opaque token to pass back for the next page.
    pub next_token: Option<String>,
}

/// A row of the local object index.
///
/// The row only describes the object; its bytes live on disk under the
/// storage directory at the path named by `key`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key, relative to the storage directory with `/` separators.
    pub key: String,

    /// Basename of the key.
    pub filename: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Modification time of the payload on disk.
    pub last_modified: DateTime<Utc>,

    /// Set when the payload disappeared from disk during a reindex.
    pub is_deleted: bool,
}

impl From<&StoredObject> for ObjectEntry {
    fn from(obj: &StoredObject) -> Self {
        ObjectEntry::new(obj.key.clone(), Some(obj.size_bytes))
    }
}
