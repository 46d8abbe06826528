//! Turns raw listed entries into photos.

use crate::{
    models::{object::ObjectEntry, photo::Photo},
    services::{cache_controller::CacheController, key_codec, lister::StoreResult},
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Photos built from one batch of entries, plus how many entries were not
/// photos at all.
#[derive(Debug, Default)]
pub struct Assembled {
    pub photos: Vec<Photo>,
    pub skipped: usize,
}

pub struct PhotoAssembler {
    urls: Arc<CacheController>,
    batch_size: usize,
}

impl PhotoAssembler {
    pub fn new(urls: Arc<CacheController>, batch_size: usize) -> Self {
        Self {
            urls,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn assemble(&self, entries: Vec<ObjectEntry>) -> StoreResult<Assembled> {
        self.assemble_where(entries, |_| true).await
    }

    /// Assemble only the entries whose timestamp satisfies `keep`.
    ///
    /// Non-photo entries (wrong pattern, bad date, sidecars) are dropped
    /// silently and counted in `skipped`. Entries rejected by `keep` cost no
    /// URL. Access URLs are resolved `batch_size` at a time; output keeps
    /// input order.
    pub async fn assemble_where<F>(
        &self,
        entries: Vec<ObjectEntry>,
        keep: F,
    ) -> StoreResult<Assembled>
    where
        F: Fn(DateTime<Utc>) -> bool,
    {
        let mut skipped = 0;
        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = key_codec::file_name(&entry.key);
            if !key_codec::is_photo_file(name) {
                skipped += 1;
                continue;
            }
            let Some(timestamp) = key_codec::parse_timestamp(name) else {
                skipped += 1;
                continue;
            };
            if keep(timestamp) {
                candidates.push((entry, timestamp));
            }
        }

        if skipped > 0 {
            debug!("skipped {} non-photo entries", skipped);
        }

        let mut photos = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.batch_size) {
            let urls = try_join_all(
                batch
                    .iter()
                    .map(|(entry, _)| self.urls.get_access_url(&entry.key)),
            )
            .await?;

            for ((entry, timestamp), access_url) in batch.iter().zip(urls) {
                photos.push(Photo {
                    key: entry.key.clone(),
                    file_name: key_codec::file_name(&entry.key).to_string(),
                    timestamp: *timestamp,
                    access_url,
                    size_bytes: entry.size_bytes,
                });
            }
        }

        Ok(Assembled { photos, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        clock::SystemClock,
        lister::StoreError,
        memory_store::{InjectedFailure, MemoryStore},
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn assembler(store: Arc<MemoryStore>) -> PhotoAssembler {
        let urls = CacheController::new(
            store,
            Arc::new(SystemClock),
            Duration::from_secs(3600),
            Duration::from_secs(300),
        );
        PhotoAssembler::new(Arc::new(urls), 5)
    }

    fn entries(keys: &[&str]) -> Vec<ObjectEntry> {
        keys.iter().map(|key| ObjectEntry::new(*key, Some(10))).collect()
    }

    #[tokio::test]
    async fn drops_malformed_entries_and_counts_them() {
        let store = Arc::new(MemoryStore::new());
        let assembled = assembler(store.clone())
            .assemble(entries(&[
                "cat_20251030_031000.jpg",
                "cat_2025-10-30.jpg",
                "cat_20251030_031000.json",
                "uploads/partial.tmp",
                "photos/cat_20251030_032000.png",
            ]))
            .await
            .unwrap();

        let names: Vec<&str> = assembled.photos.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, vec!["cat_20251030_031000.jpg", "cat_20251030_032000.png"]);
        assert_eq!(assembled.skipped, 3);
        assert_eq!(store.url_calls(), 2);
    }

    #[tokio::test]
    async fn keeps_input_order_across_batches() {
        let store = Arc::new(MemoryStore::new());
        let keys: Vec<String> = (0..12)
            .map(|minute| format!("cat_20251030_03{minute:02}00.jpg"))
            .rev()
            .collect();
        let raw = keys.iter().map(|key| ObjectEntry::new(key.clone(), None)).collect();

        let assembled = assembler(store).assemble(raw).await.unwrap();

        let assembled_keys: Vec<String> = assembled.photos.into_iter().map(|p| p.key).collect();
        assert_eq!(assembled_keys, keys);
    }

    #[tokio::test]
    async fn filtered_entries_cost_no_url() {
        let store = Arc::new(MemoryStore::new());
        let cutoff = key_codec::parse_timestamp("cat_20251030_032000.jpg").unwrap();

        let assembled = assembler(store.clone())
            .assemble_where(
                entries(&[
                    "cat_20251030_031000.jpg",
                    "cat_20251030_032000.jpg",
                    "cat_20251030_033000.jpg",
                ]),
                |ts| ts > cutoff,
            )
            .await
            .unwrap();

        assert_eq!(assembled.photos.len(), 1);
        assert_eq!(store.url_calls(), 1);
    }

    #[tokio::test]
    async fn url_failures_propagate() {
        let store = Arc::new(MemoryStore::new());
        store.fail_with(Some(InjectedFailure::Credential));

        let err = assembler(store)
            .assemble(entries(&["cat_20251030_031000.jpg"]))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Credential(_)));
    }
}
