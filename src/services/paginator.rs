//! Backward pagination over day buckets.
//!
//! Newest-first pages are served from a session cache that grows one day
//! bucket at a time, walking backwards from the day the cache was reset.
//! Growth happens only when a requested page reaches past the end of what is
//! cached, and stops for good at a configurable horizon.
//!
//! Two locks keep growth sane under concurrent page requests:
//! - `state` guards the cache itself and is never held across I/O;
//! - `growing` is the in-flight guard. Only its holder lists a bucket, and a
//!   request that waited on it re-checks the cache before listing anything,
//!   so concurrent requests share one growth instead of scanning twice.
//!
//! Each reset bumps the cache epoch. A growth that started under an older
//! epoch drops its results on completion.

use crate::{
    models::photo::{Page, Photo, sort_newest_first},
    services::{
        clock::Clock,
        fetcher::{FetchError, FetchResult, PhotoFetcher},
        key_codec::DateBucket,
    },
};
use chrono::{DateTime, Days, Utc};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default distance back from "today" after which pagination stops.
pub const DEFAULT_HORIZON_DAYS: u64 = 730;

#[derive(Debug)]
struct PaginationCache {
    /// Newest first, one entry per key.
    photos: Vec<Photo>,
    keys: HashSet<String>,
    /// Next bucket to scan.
    cursor: DateBucket,
    /// Oldest bucket that will ever be scanned.
    horizon: DateBucket,
    exhausted: bool,
    epoch: u64,
}

impl PaginationCache {
    fn new(today: DateBucket, horizon_days: u64, epoch: u64) -> Self {
        let horizon = today
            .date()
            .checked_sub_days(Days::new(horizon_days))
            .map(DateBucket::new)
            .unwrap_or(today);

        Self {
            photos: Vec::new(),
            keys: HashSet::new(),
            cursor: today,
            horizon,
            exhausted: false,
            epoch,
        }
    }

    /// Add photos not already cached and restore newest-first order.
    /// Returns how many were new.
    fn merge(&mut self, photos: Vec<Photo>) -> usize {
        let before = self.photos.len();
        for photo in photos {
            if self.keys.insert(photo.key.clone()) {
                self.photos.push(photo);
            }
        }
        let added = self.photos.len() - before;
        if added > 0 {
            sort_newest_first(&mut self.photos);
        }
        added
    }

    /// Step the cursor back one day. Past the horizon the cache is exhausted;
    /// an empty day on its own never is.
    fn advance(&mut self) {
        match self.cursor.previous() {
            Some(previous) if previous >= self.horizon => self.cursor = previous,
            Some(previous) => {
                self.cursor = previous;
                self.exhausted = true;
            }
            None => self.exhausted = true,
        }
    }

    fn page(&self, page_size: usize, page_index: usize) -> Page {
        let len = self.photos.len();
        let start = page_index.saturating_mul(page_size).min(len);
        let end = page_end(page_size, page_index);
        let photos = self.photos[start..end.min(len)].to_vec();

        Page {
            photos,
            has_more: end < len || !self.exhausted,
        }
    }

    fn satisfies(&self, target_len: usize) -> bool {
        self.photos.len() >= target_len || self.exhausted
    }
}

fn page_end(page_size: usize, page_index: usize) -> usize {
    page_index.saturating_add(1).saturating_mul(page_size)
}

pub struct BackwardPaginator {
    fetcher: Arc<PhotoFetcher>,
    clock: Arc<dyn Clock>,
    horizon_days: u64,
    state: Mutex<PaginationCache>,
    growing: Mutex<()>,
}

impl BackwardPaginator {
    pub fn new(fetcher: Arc<PhotoFetcher>, clock: Arc<dyn Clock>, horizon_days: u64) -> Self {
        let today = DateBucket::containing(clock.now());
        Self {
            fetcher,
            clock,
            horizon_days,
            state: Mutex::new(PaginationCache::new(today, horizon_days, 0)),
            growing: Mutex::new(()),
        }
    }

    /// Empty the cache and start again from today. Safe while a growth is in
    /// flight: that growth's results will be discarded.
    pub async fn reset_cache(&self) {
        let today = DateBucket::containing(self.clock.now());
        let mut state = self.state.lock().await;
        let epoch = state.epoch + 1;
        *state = PaginationCache::new(today, self.horizon_days, epoch);
        info!("pagination cache reset (epoch {}, cursor {})", epoch, today);
    }

    /// Page `page_index` (zero-based) of `page_size` photos, newest first.
    ///
    /// Pages already covered by the cache are served without any listing.
    pub async fn get_page(&self, page_size: usize, page_index: usize) -> FetchResult<Page> {
        if page_size == 0 {
            return Err(FetchError::InvalidRequest(
                "page size must be at least 1".into(),
            ));
        }
        let target_len = page_end(page_size, page_index);

        loop {
            {
                let state = self.state.lock().await;
                if state.satisfies(target_len) {
                    return Ok(state.page(page_size, page_index));
                }
            }
            self.grow_towards(target_len).await?;
        }
    }

    /// Scan the bucket at the cursor unconditionally (unless exhausted).
    pub async fn grow_one_bucket(&self) -> FetchResult<()> {
        self.grow_towards(usize::MAX).await
    }

    async fn grow_towards(&self, target_len: usize) -> FetchResult<()> {
        let _in_flight = self.growing.lock().await;

        let (bucket, epoch) = {
            let state = self.state.lock().await;
            if state.satisfies(target_len) {
                return Ok(());
            }
            (state.cursor, state.epoch)
        };

        let photos = self.fetcher.fetch_bucket(bucket).await?;
        let found = photos.len();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(
                "discarding {} photos from bucket {} (epoch {} is stale)",
                found, bucket, epoch
            );
            return Ok(());
        }
        let added = state.merge(photos);
        state.advance();
        debug!(
            "scanned bucket {}: {} photos, {} new, {} cached, exhausted: {}",
            bucket,
            found,
            added,
            state.photos.len(),
            state.exhausted
        );
        Ok(())
    }

    /// Merge photos fetched by a refresh into the cache, provided it is
    /// still the cache the refresh was anchored on. Returns how many were new.
    pub async fn merge_newer(&self, epoch: u64, photos: Vec<Photo>) -> usize {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(
                "discarding {} refreshed photos (epoch {} is stale)",
                photos.len(),
                epoch
            );
            return 0;
        }
        state.merge(photos)
    }

    /// Timestamp of the newest cached photo and the epoch it belongs to:
    /// the anchor for a refresh.
    pub async fn refresh_anchor(&self) -> Option<(DateTime<Utc>, u64)> {
        let state = self.state.lock().await;
        state
            .photos
            .first()
            .map(|photo| (photo.timestamp, state.epoch))
    }

    pub async fn cached_len(&self) -> usize {
        self.state.lock().await.photos.len()
    }

    pub async fn is_exhausted(&self) -> bool {
        self.state.lock().await.exhausted
    }

    pub async fn cursor(&self) -> DateBucket {
        self.state.lock().await.cursor
    }

    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    /// The whole cache, newest first.
    pub async fn snapshot(&self) -> Vec<Photo> {
        self.state.lock().await.photos.clone()
    }
}
