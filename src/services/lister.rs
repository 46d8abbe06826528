//! The object-store boundary.
//!
//! The gallery core never talks to a store directly; it goes through
//! [`ObjectLister`], whose only list primitive is "keys under a prefix,
//! ascending, paged by an opaque continuation token".

use crate::models::object::{ListPage, ObjectEntry};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashSet, io, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Largest page a single list call may ask for.
pub const MAX_LIST_KEYS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("credentials rejected: {0}")]
    Credential(String),
    #[error("listing failed: {0}")]
    Listing(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// List keys starting with `prefix`, at most `max_keys` per call.
    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage>;

    /// A URL granting read access to `key` for `ttl`.
    async fn generate_access_url(&self, key: &str, ttl: Duration) -> StoreResult<String>;

    /// Create `dest_key` as a copy of `source_key`.
    async fn copy(&self, source_key: &str, dest_key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Object payload, or `None` if the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;
}

/// List every entry under `prefix`, following continuation tokens until the
/// store reports the listing complete.
///
/// A truncated page that carries no token, or a token the store already
/// handed out, fails the listing rather than looping or truncating.
pub async fn list_all(
    lister: &dyn ObjectLister,
    prefix: &str,
    max_keys: usize,
) -> StoreResult<Vec<ObjectEntry>> {
    let max_keys = max_keys.clamp(1, MAX_LIST_KEYS);
    let mut entries = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut token: Option<String> = None;
    let mut calls = 0usize;

    loop {
        let page = lister.list(prefix, max_keys, token.as_deref()).await?;
        calls += 1;
        entries.extend(page.entries);

        if !page.is_truncated {
            break;
        }
        let next = page.next_token.ok_or_else(|| {
            StoreError::Listing(format!(
                "listing of `{prefix}` truncated without a continuation token"
            ))
        })?;
        if !seen_tokens.insert(next.clone()) {
            return Err(StoreError::Listing(format!(
                "listing of `{prefix}` repeated a continuation token"
            )));
        }
        token = Some(next);
    }

    debug!("listed {} entries under `{}` in {} calls", entries.len(), prefix, calls);
    Ok(entries)
}
