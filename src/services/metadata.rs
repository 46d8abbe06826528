//! Sensor metadata lookups for the graphing view.
//!
//! A single bad sidecar must never sink a whole chart: lookups report
//! failure as `None`, and batches count failures instead of aborting.

use crate::{
    models::{
        metadata::{Metadata, MetadataBatch, PhotoMetadata, TrendPoint},
        photo::Photo,
    },
    services::{key_codec, lister::ObjectLister},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, warn};

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Metadata for the photo `key`, or `None` if it is missing or unreadable.
    async fn get(&self, key: &str) -> Option<Metadata>;
}

/// Reads the JSON sidecar stored next to each photo.
pub struct StoreMetadataLookup {
    lister: Arc<dyn ObjectLister>,
}

impl StoreMetadataLookup {
    pub fn new(lister: Arc<dyn ObjectLister>) -> Self {
        Self { lister }
    }
}

#[async_trait]
impl MetadataLookup for StoreMetadataLookup {
    async fn get(&self, key: &str) -> Option<Metadata> {
        let sidecar = key_codec::metadata_key(key)?;
        match self.lister.get(&sidecar).await {
            Ok(Some(bytes)) => {
                let parsed = Metadata::from_json(&bytes);
                if parsed.is_none() {
                    warn!("malformed metadata in `{}`", sidecar);
                }
                parsed
            }
            Ok(None) => {
                debug!("no metadata sidecar `{}`", sidecar);
                None
            }
            Err(err) => {
                warn!("failed to read metadata `{}`: {}", sidecar, err);
                None
            }
        }
    }
}

pub struct MetadataService {
    lookup: Arc<dyn MetadataLookup>,
    batch_size: usize,
}

impl MetadataService {
    pub fn new(lookup: Arc<dyn MetadataLookup>, batch_size: usize) -> Self {
        Self {
            lookup,
            batch_size: batch_size.max(1),
        }
    }

    /// Look up metadata for every photo, at most `batch_size` at a time.
    /// Entries keep the order of `photos`.
    pub async fn fetch_for(&self, photos: &[Photo]) -> MetadataBatch {
        let requests: Vec<(String, DateTime<Utc>)> = photos
            .iter()
            .map(|photo| (photo.key.clone(), photo.timestamp))
            .collect();
        let results: Vec<Option<PhotoMetadata>> = stream::iter(requests)
            .map(|(key, timestamp)| {
                let lookup = Arc::clone(&self.lookup);
                async move {
                    let metadata = lookup.get(&key).await?;
                    Some(PhotoMetadata {
                        key,
                        timestamp,
                        metadata,
                    })
                }
            })
            .buffered(self.batch_size)
            .collect()
            .await;

        let total = results.len();
        let entries: Vec<PhotoMetadata> = results.into_iter().flatten().collect();
        let failed = total - entries.len();
        if failed > 0 {
            warn!("metadata lookup failed for {} of {} photos", failed, total);
        }

        MetadataBatch {
            entries,
            failed,
            total,
        }
    }
}

/// Group readings by name into time-ascending series.
pub fn trend_series(batch: &MetadataBatch) -> BTreeMap<String, Vec<TrendPoint>> {
    let mut series: BTreeMap<String, Vec<TrendPoint>> = BTreeMap::new();
    for entry in &batch.entries {
        for (name, value) in &entry.metadata.readings {
            series.entry(name.clone()).or_default().push(TrendPoint {
                timestamp: entry.timestamp,
                value: *value,
            });
        }
    }
    for points in series.values_mut() {
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::metadata::BatchStatus,
        services::{key_codec::parse_timestamp, memory_store::MemoryStore},
    };
    use pretty_assertions::assert_eq;

    fn photo(name: &str) -> Photo {
        Photo {
            key: name.to_string(),
            file_name: name.to_string(),
            timestamp: parse_timestamp(name).unwrap(),
            access_url: String::new(),
            size_bytes: None,
        }
    }

    fn service(store: Arc<MemoryStore>) -> MetadataService {
        MetadataService::new(Arc::new(StoreMetadataLookup::new(store)), 5)
    }

    #[tokio::test]
    async fn partial_failures_are_counted_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.insert("cat_20251030_031000.json", br#"{"temperature": 20.5}"#.as_slice());
        store.insert("cat_20251030_032000.json", b"{not json".as_slice());
        store.insert("cat_20251030_033000.json", br#"{"temperature": 21.0}"#.as_slice());

        let photos = vec![
            photo("cat_20251030_033000.jpg"),
            photo("cat_20251030_032000.jpg"),
            photo("cat_20251030_031000.jpg"),
            photo("cat_20251030_034000.jpg"),
        ];
        let batch = service(store).fetch_for(&photos).await;

        assert_eq!(batch.total, 4);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.status(), BatchStatus::Partial { failed: 2, total: 4 });
        let keys: Vec<&str> = batch.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["cat_20251030_033000.jpg", "cat_20251030_031000.jpg"]);
    }

    #[tokio::test]
    async fn trends_are_time_ascending() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "cat_20251030_031000.json",
            br#"{"temperature": 20.0, "humidity": 50}"#.as_slice(),
        );
        store.insert("cat_20251030_032000.json", br#"{"temperature": 22.0}"#.as_slice());

        let photos = vec![photo("cat_20251030_032000.jpg"), photo("cat_20251030_031000.jpg")];
        let batch = service(store).fetch_for(&photos).await;
        let series = trend_series(&batch);

        let temperature: Vec<f64> = series["temperature"].iter().map(|p| p.value).collect();
        assert_eq!(temperature, vec![20.0, 22.0]);
        assert_eq!(series["humidity"].len(), 1);
    }
}
