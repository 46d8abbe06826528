//! A photo uploaded by the camera, as presented to the browser.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single photo, fully assembled from a listed object.
///
/// `timestamp` is parsed from the file name and is the only ordering key;
/// the store's listing order plays no part. `access_url` is short-lived and
/// is not part of the photo's identity: two photos are the same photo iff
/// their keys match.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    /// Object key (opaque store identifier, unique).
    pub key: String,

    /// Basename of the key, e.g. `cat_20251030_031000.jpg`.
    pub file_name: String,

    /// Capture instant in UTC.
    pub timestamp: DateTime<Utc>,

    /// Time-limited URL the browser can load the image from.
    pub access_url: String,

    /// Object size, when the store reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
}

impl PartialEq for Photo {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Photo {}

/// Sort newest-first. Stable, so equal timestamps keep their relative order.
pub fn sort_newest_first(photos: &mut [Photo]) {
    photos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// One page of the backward-paginated feed.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub photos: Vec<Photo>,
    pub has_more: bool,
}
