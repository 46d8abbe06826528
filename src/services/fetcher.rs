//! Range and incremental photo fetching.
//!
//! The store cannot query by date, so both fetchers plan a query as a set of
//! day buckets (with a day of slack either side), list every bucket
//! exhaustively, and then trim the merged result to the exact window.

use crate::{
    models::{
        object::ObjectEntry,
        photo::{Photo, sort_newest_first},
    },
    services::{
        assembler::PhotoAssembler,
        clock::Clock,
        key_codec::{self, DateBucket},
        lister::{self, ObjectLister, StoreError, StoreResult},
    },
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("listing failed: {0}")]
    Listing(String),
    #[error("credentials rejected: {0}")]
    Credential(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn is_credential(&self) -> bool {
        matches!(self, FetchError::Credential(_))
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => FetchError::NotFound(key),
            StoreError::Credential(reason) => FetchError::Credential(reason),
            StoreError::InvalidKey(key) => {
                FetchError::InvalidRequest(format!("invalid object key `{key}`"))
            }
            StoreError::Listing(reason) => FetchError::Listing(reason),
            other => FetchError::Listing(other.to_string()),
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Prefix every photo key lives under, e.g. `""` or `"camera/"`.
    pub key_root: String,
    /// `max_keys` for each list call.
    pub list_page_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            key_root: String::new(),
            list_page_size: lister::MAX_LIST_KEYS,
        }
    }
}

pub struct PhotoFetcher {
    lister: Arc<dyn ObjectLister>,
    assembler: PhotoAssembler,
    clock: Arc<dyn Clock>,
    options: FetchOptions,
}

impl PhotoFetcher {
    pub fn new(
        lister: Arc<dyn ObjectLister>,
        assembler: PhotoAssembler,
        clock: Arc<dyn Clock>,
        options: FetchOptions,
    ) -> Self {
        Self {
            lister,
            assembler,
            clock,
            options,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn bucket_list_prefix(&self, bucket: DateBucket) -> String {
        format!("{}{}", self.options.key_root, key_codec::bucket_prefix(bucket))
    }

    async fn list_bucket(&self, bucket: DateBucket) -> StoreResult<Vec<ObjectEntry>> {
        let prefix = self.bucket_list_prefix(bucket);
        lister::list_all(self.lister.as_ref(), &prefix, self.options.list_page_size).await
    }

    /// List all buckets concurrently and merge the results in bucket order.
    async fn list_buckets(&self, buckets: &[DateBucket]) -> FetchResult<Vec<ObjectEntry>> {
        let per_bucket =
            try_join_all(buckets.iter().map(|bucket| self.list_bucket(*bucket))).await?;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for entry in per_bucket.into_iter().flatten() {
            if seen.insert(entry.key.clone()) {
                merged.push(entry);
            }
        }
        Ok(merged)
    }

    async fn fetch_matching<F>(&self, buckets: &[DateBucket], keep: F) -> FetchResult<Vec<Photo>>
    where
        F: Fn(DateTime<Utc>) -> bool,
    {
        let entries = self.list_buckets(buckets).await?;
        let listed = entries.len();
        let mut assembled = self.assembler.assemble_where(entries, keep).await?;
        sort_newest_first(&mut assembled.photos);
        debug!(
            "{} buckets: {} entries listed, {} photos kept, {} skipped",
            buckets.len(),
            listed,
            assembled.photos.len(),
            assembled.skipped
        );
        Ok(assembled.photos)
    }

    /// Every photo with `start <= timestamp <= end`, newest first.
    ///
    /// Any listing failure fails the whole fetch; there is no partial result.
    pub async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FetchResult<Vec<Photo>> {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let buckets = key_codec::buckets_covering(start, end);
        let photos = self
            .fetch_matching(&buckets, |ts| ts >= start && ts <= end)
            .await?;
        info!("fetched {} photos between {} and {}", photos.len(), start, end);
        Ok(photos)
    }

    /// Every photo with `since < timestamp <= now`, newest first. Photos
    /// stamped in the future are left for a later poll.
    ///
    /// Meant for polling; callers should treat an error as "try again later"
    /// and keep what they already show.
    pub async fn fetch_since(&self, since: DateTime<Utc>) -> FetchResult<Vec<Photo>> {
        let now = self.clock.now();
        if since >= now {
            return Ok(Vec::new());
        }
        let buckets = key_codec::buckets_covering(since, now);
        let photos = self
            .fetch_matching(&buckets, |ts| ts > since && ts <= now)
            .await?;
        debug!("{} photos newer than {}", photos.len(), since);
        Ok(photos)
    }

    /// Every photo in a single day bucket stamped no later than now, newest
    /// first.
    pub async fn fetch_bucket(&self, bucket: DateBucket) -> FetchResult<Vec<Photo>> {
        let now = self.clock.now();
        self.fetch_matching(&[bucket], |ts| ts <= now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        cache_controller::CacheController,
        clock::ManualClock,
        memory_store::{InjectedFailure, MemoryStore},
    };
    use chrono::{TimeDelta, TimeZone};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn at(name: &str) -> DateTime<Utc> {
        key_codec::parse_timestamp(name).unwrap()
    }

    fn fetcher(store: Arc<MemoryStore>, now: DateTime<Utc>, page_size: usize) -> PhotoFetcher {
        let clock = Arc::new(ManualClock::new(now));
        let urls = Arc::new(CacheController::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        ));
        PhotoFetcher::new(
            store,
            PhotoAssembler::new(urls, 5),
            clock,
            FetchOptions {
                key_root: String::new(),
                list_page_size: page_size,
            },
        )
    }

    fn names(photos: &[Photo]) -> Vec<&str> {
        photos.iter().map(|p| p.file_name.as_str()).collect()
    }

    #[tokio::test]
    async fn range_is_trimmed_to_the_exact_window() {
        let store = Arc::new(MemoryStore::new());
        for name in [
            "cat_20251028_235959.jpg",
            "cat_20251029_030000.jpg",
            "cat_20251029_120000.jpg",
            "cat_20251030_030000.jpg",
            "cat_20251030_030001.jpg",
            "cat_20251031_000000.jpg",
        ] {
            store.insert(name, b"img".as_slice());
        }
        let end = at("cat_20251030_030000.jpg");
        let fetcher = fetcher(store.clone(), end, 1000);

        let photos = fetcher
            .fetch_range(end - TimeDelta::hours(24), end)
            .await
            .unwrap();

        assert_eq!(
            names(&photos),
            vec![
                "cat_20251030_030000.jpg",
                "cat_20251029_120000.jpg",
                "cat_20251029_030000.jpg",
            ]
        );
        assert_eq!(
            store.listed_prefixes().len(),
            4,
            "one list call per bucket including slack days"
        );
    }

    #[tokio::test]
    async fn range_pages_through_large_days() {
        let store = Arc::new(MemoryStore::new());
        let day = Utc.with_ymd_and_hms(2025, 10, 30, 0, 0, 0).unwrap();
        for i in 0..1500 {
            let ts = day + TimeDelta::seconds(i * 50);
            store.insert(key_codec::format_file_name(ts, "jpg"), b"img".as_slice());
        }
        let fetcher = fetcher(store.clone(), day, 1000);

        let photos = fetcher
            .fetch_range(day, day + TimeDelta::hours(23))
            .await
            .unwrap();

        assert_eq!(photos.len(), 1500);
        assert!(photos.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        // two calls for the full day, one for each slack day
        assert_eq!(store.list_calls(), 4);
    }

    #[tokio::test]
    async fn since_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        for name in [
            "cat_20251030_031000.jpg",
            "cat_20251030_032000.jpg",
            "cat_20251030_033000.jpg",
        ] {
            store.insert(name, b"img".as_slice());
        }
        let fetcher = fetcher(store, at("cat_20251030_040000.jpg"), 1000);

        let photos = fetcher
            .fetch_since(at("cat_20251030_032000.jpg"))
            .await
            .unwrap();

        assert_eq!(names(&photos), vec!["cat_20251030_033000.jpg"]);
    }

    #[tokio::test]
    async fn since_stops_at_now() {
        let store = Arc::new(MemoryStore::new());
        store.insert("cat_20251030_031000.jpg", b"img".as_slice());
        store.insert("cat_20251030_050000.jpg", b"img".as_slice());
        let now = at("cat_20251030_040000.jpg");
        let fetcher = fetcher(store, now, 1000);
        let since = at("cat_20251030_020000.jpg");

        let newer = fetcher.fetch_since(since).await.unwrap();
        let window = fetcher.fetch_range(since, now).await.unwrap();

        assert_eq!(names(&newer), vec!["cat_20251030_031000.jpg"]);
        assert_eq!(newer, window);
        assert!(fetcher.fetch_since(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn since_spans_midnight() {
        let store = Arc::new(MemoryStore::new());
        store.insert("cat_20251029_235500.jpg", b"img".as_slice());
        store.insert("cat_20251030_000500.jpg", b"img".as_slice());
        let fetcher = fetcher(store, at("cat_20251030_001000.jpg"), 1000);

        let photos = fetcher
            .fetch_since(at("cat_20251029_235000.jpg"))
            .await
            .unwrap();

        assert_eq!(
            names(&photos),
            vec!["cat_20251030_000500.jpg", "cat_20251029_235500.jpg"]
        );
    }

    #[tokio::test]
    async fn any_bucket_failure_fails_the_range() {
        let store = Arc::new(MemoryStore::new());
        store.insert("cat_20251030_031000.jpg", b"img".as_slice());
        store.fail_with(Some(InjectedFailure::Listing));
        let now = at("cat_20251030_040000.jpg");
        let fetcher = fetcher(store, now, 1000);

        let err = fetcher
            .fetch_range(now - TimeDelta::hours(24), now)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Listing(_)));
    }

    #[test]
    fn store_errors_map_onto_fetch_errors() {
        assert_eq!(
            FetchError::from(StoreError::Credential("expired".into())),
            FetchError::Credential("expired".into())
        );
        assert_eq!(
            FetchError::from(StoreError::NotFound("k".into())),
            FetchError::NotFound("k".into())
        );
        assert!(matches!(
            FetchError::from(StoreError::Io(std::io::Error::other("disk"))),
            FetchError::Listing(_)
        ));
    }
}
