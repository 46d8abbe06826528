//! Favourites, kept as copies of the original photos under a separate prefix.
//!
//! The copy keeps the original file name, so a photo is a favourite iff an
//! object named `{prefix}{file_name}` exists.

use crate::services::{
    fetcher::{FetchError, FetchResult},
    key_codec,
    lister::{self, ObjectLister},
};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_FAVOURITES_PREFIX: &str = "favourites/";

pub struct FavouritesService {
    lister: Arc<dyn ObjectLister>,
    prefix: String,
    list_page_size: usize,
}

impl FavouritesService {
    pub fn new(lister: Arc<dyn ObjectLister>, prefix: impl Into<String>, list_page_size: usize) -> Self {
        Self {
            lister,
            prefix: prefix.into(),
            list_page_size,
        }
    }

    fn favourite_key(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    /// Copy the photo at `key` into favourites. Returns `false` if it
    /// already was one.
    pub async fn add(&self, key: &str) -> FetchResult<bool> {
        let file_name = key_codec::file_name(key);
        if !key_codec::is_photo_file(file_name) {
            return Err(FetchError::InvalidRequest(format!("`{key}` is not a photo")));
        }

        let dest = self.favourite_key(file_name);
        if dest == key || self.lister.exists(&dest).await? {
            return Ok(false);
        }
        self.lister.copy(key, &dest).await?;
        info!("added favourite {}", dest);
        Ok(true)
    }

    pub async fn is_favourite(&self, file_name: &str) -> FetchResult<bool> {
        Ok(self.lister.exists(&self.favourite_key(file_name)).await?)
    }

    /// File names of all favourites, in key order.
    pub async fn list(&self) -> FetchResult<Vec<String>> {
        let entries =
            lister::list_all(self.lister.as_ref(), &self.prefix, self.list_page_size).await?;
        Ok(entries
            .into_iter()
            .map(|entry| key_codec::file_name(&entry.key).to_string())
            .filter(|name| key_codec::is_photo_file(name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryStore;
    use pretty_assertions::assert_eq;

    const PHOTO: &str = "cat_20251030_031000.jpg";

    fn service(store: Arc<MemoryStore>) -> FavouritesService {
        FavouritesService::new(store, DEFAULT_FAVOURITES_PREFIX, 1000)
    }

    #[tokio::test]
    async fn add_copies_once() {
        let store = Arc::new(MemoryStore::new());
        store.insert(PHOTO, b"img".as_slice());
        let favourites = service(store.clone());

        assert!(favourites.add(PHOTO).await.unwrap());
        assert!(!favourites.add(PHOTO).await.unwrap());
        assert!(favourites.is_favourite(PHOTO).await.unwrap());
        assert_eq!(favourites.list().await.unwrap(), vec![PHOTO.to_string()]);
        assert!(store.exists(PHOTO).await.unwrap(), "original is kept");
    }

    #[tokio::test]
    async fn rejects_non_photos_and_missing_sources() {
        let store = Arc::new(MemoryStore::new());
        let favourites = service(store);

        assert!(matches!(
            favourites.add("notes.txt").await,
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(matches!(
            favourites.add(PHOTO).await,
            Err(FetchError::NotFound(_))
        ));
    }
}
