//! In-process object store.
//!
//! Behaves like the real thing from the core's point of view (ascending
//! prefix listing with continuation tokens, short-lived URLs, copy) and
//! records how it was called, so paging and caching behaviour can be
//! observed. Failures and latency can be injected.

use crate::{
    models::object::{ListPage, ObjectEntry},
    services::lister::{MAX_LIST_KEYS, ObjectLister, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectedFailure {
    Listing,
    Credential,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    list_log: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    url_calls: AtomicUsize,
    url_serial: AtomicU64,
    failure: Mutex<Option<InjectedFailure>>,
    list_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        lock(&self.objects).insert(key.into(), body.into());
    }

    pub fn remove(&self, key: &str) {
        lock(&self.objects).remove(key);
    }

    /// Make every subsequent list and URL call fail, or stop failing.
    pub fn fail_with(&self, failure: Option<InjectedFailure>) {
        *lock(&self.failure) = failure;
    }

    /// Sleep this long inside every list call.
    pub fn delay_lists(&self, delay: Option<Duration>) {
        *lock(&self.list_delay) = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Prefixes passed to `list`, in call order.
    pub fn listed_prefixes(&self) -> Vec<String> {
        lock(&self.list_log).clone()
    }

    pub fn url_calls(&self) -> usize {
        self.url_calls.load(Ordering::SeqCst)
    }

    fn injected(&self) -> StoreResult<()> {
        match *lock(&self.failure) {
            Some(InjectedFailure::Listing) => {
                Err(StoreError::Listing("injected listing failure".into()))
            }
            Some(InjectedFailure::Credential) => {
                Err(StoreError::Credential("injected credential failure".into()))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectLister for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.list_log).push(prefix.to_string());

        let delay = *lock(&self.list_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.injected()?;

        let max_keys = max_keys.clamp(1, MAX_LIST_KEYS);
        let lower = match continuation_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let objects = lock(&self.objects);
        let mut matching = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| ObjectEntry::new(key.clone(), Some(body.len() as i64)));

        let entries: Vec<ObjectEntry> = matching.by_ref().take(max_keys).collect();
        let is_truncated = matching.next().is_some();
        let next_token = if is_truncated {
            entries.last().map(|entry| entry.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            entries,
            is_truncated,
            next_token,
        })
    }

    async fn generate_access_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        self.injected()?;
        let serial = self.url_serial.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "memory://{key}?ttl={}&serial={serial}",
            ttl.as_secs()
        ))
    }

    async fn copy(&self, source_key: &str, dest_key: &str) -> StoreResult<()> {
        let mut objects = lock(&self.objects);
        let body = objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source_key.to_string()))?;
        objects.insert(dest_key.to_string(), body);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(lock(&self.objects).contains_key(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        Ok(lock(&self.objects).get(key).cloned())
    }
}
