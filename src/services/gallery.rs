//! One browsing session: the feed, date-range views, refreshes, metadata and
//! favourites, wired together over a single object store.
//!
//! Fatal errors from any operation pass through the cache controller first,
//! so a credential rejection anywhere clears the URL cache. Refreshes are the
//! exception to "fatal": a failed refresh is logged and reported as stale.

use crate::{
    models::{
        metadata::MetadataBatch,
        photo::{Page, Photo},
    },
    services::{
        assembler::PhotoAssembler,
        cache_controller::CacheController,
        clock::Clock,
        favourites::FavouritesService,
        fetcher::{FetchOptions, FetchResult, PhotoFetcher},
        key_codec,
        lister::ObjectLister,
        metadata::{MetadataService, StoreMetadataLookup},
        paginator::BackwardPaginator,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct GallerySettings {
    pub fetch: FetchOptions,
    pub url_ttl: Duration,
    pub url_refresh_margin: Duration,
    /// Parallel URL generations and metadata lookups per batch.
    pub batch_size: usize,
    pub horizon_days: u64,
    pub favourites_prefix: String,
}

/// Result of a polling refresh. `stale` means the refresh failed and the
/// caller should keep showing what it has.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Refresh {
    pub photos: Vec<Photo>,
    pub stale: bool,
}

pub struct Gallery {
    fetcher: Arc<PhotoFetcher>,
    paginator: BackwardPaginator,
    urls: Arc<CacheController>,
    metadata: MetadataService,
    favourites: FavouritesService,
}

impl Gallery {
    pub fn new(
        lister: Arc<dyn ObjectLister>,
        clock: Arc<dyn Clock>,
        settings: GallerySettings,
    ) -> Self {
        let urls = Arc::new(CacheController::new(
            lister.clone(),
            clock.clone(),
            settings.url_ttl,
            settings.url_refresh_margin,
        ));
        let assembler = PhotoAssembler::new(urls.clone(), settings.batch_size);
        let fetcher = Arc::new(PhotoFetcher::new(
            lister.clone(),
            assembler,
            clock.clone(),
            settings.fetch.clone(),
        ));
        let paginator = BackwardPaginator::new(fetcher.clone(), clock, settings.horizon_days);
        let metadata = MetadataService::new(
            Arc::new(StoreMetadataLookup::new(lister.clone())),
            settings.batch_size,
        );
        let favourites = FavouritesService::new(
            lister,
            settings.favourites_prefix,
            settings.fetch.list_page_size,
        );

        Self {
            fetcher,
            paginator,
            urls,
            metadata,
            favourites,
        }
    }

    async fn observed<T>(&self, result: FetchResult<T>) -> FetchResult<T> {
        if let Err(err) = &result {
            self.urls.observe(err).await;
        }
        result
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.fetcher.now()
    }

    pub async fn page(&self, page_size: usize, page_index: usize) -> FetchResult<Page> {
        let result = self.paginator.get_page(page_size, page_index).await;
        self.observed(result).await
    }

    /// Photos in `[start, end]`. Changing the date range invalidates the
    /// backward-paginated feed.
    pub async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> FetchResult<Vec<Photo>> {
        self.paginator.reset_cache().await;
        let result = self.fetcher.fetch_range(start, end).await;
        self.observed(result).await
    }

    /// Photos strictly newer than `since`. Never fails.
    pub async fn since(&self, since: DateTime<Utc>) -> Refresh {
        match self.fetcher.fetch_since(since).await {
            Ok(photos) => Refresh {
                photos,
                stale: false,
            },
            Err(err) => {
                warn!("refresh since {} failed, keeping stale data: {}", since, err);
                self.urls.observe(&err).await;
                Refresh {
                    photos: Vec::new(),
                    stale: true,
                }
            }
        }
    }

    /// Fetch what arrived after the newest cached photo and merge it into the
    /// feed. An empty feed has nothing to refresh from, and a feed reset
    /// while the refresh was in flight does not receive its results.
    pub async fn refresh(&self) -> Refresh {
        let Some((newest, epoch)) = self.paginator.refresh_anchor().await else {
            return Refresh {
                photos: Vec::new(),
                stale: false,
            };
        };

        let refresh = self.since(newest).await;
        if !refresh.photos.is_empty() {
            self.paginator
                .merge_newer(epoch, refresh.photos.clone())
                .await;
        }
        refresh
    }

    /// Manual "refresh from scratch".
    pub async fn reset(&self) {
        self.paginator.reset_cache().await;
    }

    pub async fn logout(&self) {
        self.urls.invalidate_all().await;
        self.paginator.reset_cache().await;
    }

    /// Sensor metadata for every photo in `[start, end]`.
    pub async fn metadata(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FetchResult<MetadataBatch> {
        let photos = self.fetcher.fetch_range(start, end).await;
        let photos = self.observed(photos).await?;
        Ok(self.metadata.fetch_for(&photos).await)
    }

    pub async fn add_favourite(&self, key: &str) -> FetchResult<bool> {
        let result = self.favourites.add(key).await;
        self.observed(result).await
    }

    /// Whether the photo at `key` has been copied into favourites.
    pub async fn is_favourite(&self, key: &str) -> FetchResult<bool> {
        let result = self
            .favourites
            .is_favourite(key_codec::file_name(key))
            .await;
        self.observed(result).await
    }

    pub async fn favourites(&self) -> FetchResult<Vec<String>> {
        let result = self.favourites.list().await;
        self.observed(result).await
    }

    pub fn paginator(&self) -> &BackwardPaginator {
        &self.paginator
    }

    pub fn cache_controller(&self) -> &CacheController {
        &self.urls
    }

    pub fn subscribe_invalidations(&self) -> watch::Receiver<u64> {
        self.urls.subscribe()
    }
}
