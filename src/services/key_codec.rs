//! Key codec: capture timestamps from object keys, and day-bucket prefixes
//! from time ranges.
//!
//! Photo files are named `cat_YYYYMMDD_HHMMSS.<ext>` with the date and time
//! in UTC. The store can only list by prefix in ascending key order, so a
//! UTC calendar day (`cat_YYYYMMDD_`) is the unit every query is planned in.
//! Everything here is pure; no I/O.

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use std::fmt;

pub const PHOTO_PREFIX: &str = "cat_";
pub const METADATA_EXTENSION: &str = "json";
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const DATE_DIGITS: usize = 8;
const TIME_DIGITS: usize = 6;

/// A UTC calendar day, used only as a list-prefix shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateBucket(NaiveDate);

impl DateBucket {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The bucket holding photos taken at `ts`.
    pub fn containing(ts: DateTime<Utc>) -> Self {
        Self(ts.date_naive())
    }

    pub fn date(self) -> NaiveDate {
        self.0
    }

    /// The day before. `None` only at the very start of chrono's calendar.
    pub fn previous(self) -> Option<Self> {
        self.0.pred_opt().map(Self)
    }

    pub fn prefix(self) -> String {
        bucket_prefix(self)
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Basename of a key: everything after the last `/`.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Parse the capture instant out of a photo file name.
///
/// Digits are read as UTC, never local time. Returns `None` for anything
/// that does not match the pattern exactly, including impossible dates.
pub fn parse_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let rest = file_name.strip_prefix(PHOTO_PREFIX)?;
    let (stem, ext) = rest.split_once('.')?;
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }

    let (date, time) = stem.split_once('_')?;
    if date.len() != DATE_DIGITS || time.len() != TIME_DIGITS {
        return None;
    }
    if !date.bytes().chain(time.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year = date[0..4].parse().ok()?;
    let month = date[4..6].parse().ok()?;
    let day = date[6..8].parse().ok()?;
    let hour = time[0..2].parse().ok()?;
    let minute = time[2..4].parse().ok()?;
    let second = time[4..6].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|naive| naive.and_utc())
}

/// Inverse of [`parse_timestamp`].
pub fn format_file_name(ts: DateTime<Utc>, ext: &str) -> String {
    format!(
        "{PHOTO_PREFIX}{:04}{:02}{:02}_{:02}{:02}{:02}.{ext}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

fn extension(file_name: &str) -> Option<&str> {
    file_name.rsplit_once('.').map(|(_, ext)| ext)
}

/// True for keys naming an image whose file name carries a valid timestamp.
/// Metadata sidecars share the name pattern but are not photos.
pub fn is_photo_file(file_name: &str) -> bool {
    let image = extension(file_name).is_some_and(|ext| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext))
    });
    image && parse_timestamp(file_name).is_some()
}

/// Key of the metadata sidecar belonging to a photo key.
pub fn metadata_key(key: &str) -> Option<String> {
    let name = file_name(key);
    if !is_photo_file(name) {
        return None;
    }
    let (stem, _) = key.rsplit_once('.')?;
    Some(format!("{stem}.{METADATA_EXTENSION}"))
}

/// Every UTC day from `start - 1 day` through `end + 1 day`, ascending.
///
/// The slack on both sides keeps boundary-adjacent photos from being missed
/// when a range edge falls inside a day. Reversed bounds are swapped.
pub fn buckets_covering(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateBucket> {
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    let first = start.date_naive().checked_sub_days(Days::new(1));
    let last = end.date_naive().checked_add_days(Days::new(1));
    let (Some(first), Some(last)) = (first, last) else {
        return Vec::new();
    };

    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(DateBucket)
        .collect()
}

/// `cat_YYYYMMDD_` for a bucket.
pub fn bucket_prefix(bucket: DateBucket) -> String {
    format!("{PHOTO_PREFIX}{}_", bucket.0.format("%Y%m%d"))
}
