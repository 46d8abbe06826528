//! Access-URL cache and credential invalidation.
//!
//! Signed URLs are the expensive derived artifact of browsing: one store
//! call per photo. The controller hands out a cached URL while it still has
//! a useful lifetime left and regenerates it otherwise. It is the only path
//! that clears the cache, and it announces every clear on a watch channel so
//! other credential-derived state can drop itself too.

use crate::services::{
    clock::Clock,
    fetcher::FetchError,
    lister::{ObjectLister, StoreResult},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

#[derive(Clone, Debug)]
struct CachedUrl {
    url: String,
    expires_at: DateTime<Utc>,
}

pub struct CacheController {
    lister: Arc<dyn ObjectLister>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    ttl_delta: TimeDelta,
    refresh_margin: TimeDelta,
    entries: Mutex<HashMap<String, CachedUrl>>,
    generation: watch::Sender<u64>,
}

impl CacheController {
    /// `refresh_margin` is how long before expiry a cached URL stops being
    /// served; it is capped at half the TTL.
    pub fn new(
        lister: Arc<dyn ObjectLister>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        refresh_margin: Duration,
    ) -> Self {
        let ttl_delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let refresh_margin = TimeDelta::from_std(refresh_margin)
            .unwrap_or(TimeDelta::MAX)
            .min(ttl_delta / 2);
        let (generation, _) = watch::channel(0);

        Self {
            lister,
            clock,
            ttl,
            ttl_delta,
            refresh_margin,
            entries: Mutex::new(HashMap::new()),
            generation,
        }
    }

    /// A URL for `key` that stays valid for at least the refresh margin.
    pub async fn get_access_url(&self, key: &str) -> StoreResult<String> {
        let now = self.clock.now();
        {
            let entries = self.entries.lock().await;
            if let Some(cached) = entries
                .get(key)
                .filter(|cached| cached.expires_at - self.refresh_margin > now)
            {
                return Ok(cached.url.clone());
            }
        }

        let generation = *self.generation.borrow();
        let url = self.lister.generate_access_url(key, self.ttl).await?;
        let expires_at = now
            .checked_add_signed(self.ttl_delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.lock().await;
        if *self.generation.borrow() == generation {
            entries.insert(
                key.to_string(),
                CachedUrl {
                    url: url.clone(),
                    expires_at,
                },
            );
        } else {
            debug!("not caching url for `{}`: credentials invalidated meanwhile", key);
        }
        Ok(url)
    }

    /// Drop every cached URL and notify subscribers.
    pub async fn invalidate_all(&self) {
        let dropped = {
            let mut entries = self.entries.lock().await;
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        self.generation.send_modify(|generation| *generation += 1);
        info!("invalidated {} cached access urls", dropped);
    }

    /// Invalidate if `err` means the store rejected our credentials.
    pub async fn observe(&self, err: &FetchError) {
        if err.is_credential() {
            self.invalidate_all().await;
        }
    }

    /// Receives the invalidation count each time the cache is cleared.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub async fn cached_len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
