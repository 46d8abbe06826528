//! src/services/local_store.rs
//!
//! LocalStore: an object store over a plain directory, with an SQLite index
//! of what the directory holds. The camera (or whatever syncs its uploads)
//! writes files beneath `base_path`; `reindex` brings the index in line with
//! the directory, and listing is served from the index in ascending key
//! order with opaque continuation tokens, as an S3 ListObjectsV2 would.
//!
//! Access URLs point back at this service's `/objects/{key}` route and carry
//! an expiry plus an HMAC-SHA256 signature over the key and expiry.

use crate::{
    models::object::{ListPage, ObjectEntry, StoredObject},
    services::{
        clock::Clock,
        lister::{MAX_LIST_KEYS, ObjectLister, StoreError, StoreResult},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use md5::Context;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    fmt,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncReadExt,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const HASH_CHUNK: usize = 64 * 1024;

/// Unreserved characters stay as they are; everything else in a key
/// segment is percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const SELECT_OBJECT: &str = "SELECT id, key, filename, size_bytes, etag, last_modified, is_deleted \
                             FROM objects";

/// Secret used to sign access URLs. Never printed.
#[derive(Clone)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningSecret").field(&"<redacted>").finish()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReindexReport {
    pub indexed: usize,
    pub removed: u64,
}

#[derive(Debug, Clone)]
pub struct Readiness {
    pub database: Result<(), String>,
    pub disk: Result<(), String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.database.is_ok() && self.disk.is_ok()
    }
}

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool holding the object index.
    pub db: Arc<SqlitePool>,

    /// Directory holding the object payloads, one file per key.
    pub base_path: PathBuf,

    public_base_url: String,
    secret: SigningSecret,
    clock: Arc<dyn Clock>,
}

/// Apply the embedded schema statement by statement.
pub async fn migrate(db: &SqlitePool) -> StoreResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());
    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

impl LocalStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        secret: SigningSecret,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            secret,
            clock,
        }
    }

    /// Reject keys that could escape `base_path` or that no camera would
    /// produce: empty, absolute, `..`, backslashes, control characters.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.extend(key.split('/'));
        path
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "{SELECT_OBJECT} WHERE key = ? AND is_deleted = 0"
        ))
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn upsert_object(
        &self,
        key: &str,
        size_bytes: i64,
        etag: &str,
        last_modified: DateTime<Utc>,
        index_run: Uuid,
    ) -> StoreResult<()> {
        let filename = key.rsplit('/').next().unwrap_or(key);
        sqlx::query(
            r#"
            INSERT INTO objects (
                id, key, filename, size_bytes, etag, last_modified, index_run, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                index_run = excluded.index_run,
                is_deleted = 0
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(filename)
        .bind(size_bytes)
        .bind(etag)
        .bind(last_modified)
        .bind(index_run)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Walk `base_path`, upsert a row for every file and soft-delete rows
    /// whose file is gone. Dot-files are ignored.
    pub async fn reindex(&self) -> StoreResult<ReindexReport> {
        let run = Uuid::new_v4();
        let mut report = ReindexReport::default();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Some(key) = self.key_for_path(&path) else {
                    warn!("skipping unindexable path {}", path.display());
                    continue;
                };
                if self.ensure_key_safe(&key).is_err() {
                    warn!("skipping unsafe key `{}`", key);
                    continue;
                }

                let metadata = entry.metadata().await?;
                let last_modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| self.clock.now());
                let etag = md5_file(&path).await?;
                self.upsert_object(&key, metadata.len() as i64, &etag, last_modified, run)
                    .await?;
                report.indexed += 1;
            }
        }

        report.removed =
            sqlx::query("UPDATE objects SET is_deleted = 1 WHERE index_run <> ? AND is_deleted = 0")
                .bind(run)
                .execute(&*self.db)
                .await?
                .rows_affected();

        info!(
            "reindexed {}: {} objects, {} removed",
            self.base_path.display(),
            report.indexed,
            report.removed
        );
        Ok(report)
    }

    fn key_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let parts = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    fn mac(&self, key: &str, expires: i64) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.0.as_bytes())
            .map_err(|err| StoreError::Credential(format!("unusable signing secret: {err}")))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, key: &str, expires: i64) -> StoreResult<String> {
        let tag = self.mac(key, expires)?.finalize().into_bytes();
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(tag))
    }

    /// Check an access URL's expiry and signature. The signature comparison
    /// is constant-time.
    pub fn verify_access(&self, key: &str, expires: i64, signature: &str) -> StoreResult<()> {
        let bad_signature = || StoreError::Credential(format!("bad signature for `{key}`"));
        let tag = general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| bad_signature())?;
        self.mac(key, expires)?
            .verify_slice(&tag)
            .map_err(|_| bad_signature())?;
        if expires < self.clock.now().timestamp() {
            return Err(StoreError::Credential(format!("access to `{key}` expired")));
        }
        Ok(())
    }

    /// Seconds left before a URL expiring at `expires` stops working.
    pub fn seconds_until(&self, expires: i64) -> i64 {
        (expires - self.clock.now().timestamp()).max(0)
    }

    /// Reindex every `period` until the task is aborted, starting one period
    /// from now. Failures are logged and retried on the next tick.
    pub fn spawn_reindexer(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.reindex().await {
                    Ok(report) => debug!(
                        "periodic reindex: {} objects, {} removed",
                        report.indexed, report.removed
                    ),
                    Err(err) => error!("periodic reindex failed: {}", err),
                }
            }
        })
    }

    /// Open an object for streaming. A row whose file has vanished counts as
    /// not found.
    pub async fn open(&self, key: &str) -> StoreResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok((object, file))
    }

    /// Database round trip plus a write/read/delete under `base_path`.
    pub async fn readiness(&self) -> Readiness {
        let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => Ok(()),
            Ok(v) => Err(format!("unexpected result: {}", v)),
            Err(e) => Err(format!("error: {}", e)),
        };

        let marker = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let disk = match fs::write(&marker, b"readyz").await {
            Ok(()) => {
                let read = fs::read(&marker).await;
                let _ = fs::remove_file(&marker).await;
                match read {
                    Ok(bytes) if bytes == b"readyz" => Ok(()),
                    Ok(_) => Err("read back different content".to_string()),
                    Err(e) => Err(format!("read error: {}", e)),
                }
            }
            Err(e) => Err(format!("write error: {}", e)),
        };

        Readiness { database, disk }
    }
}

async fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.consume(&buf[..read]);
    }
    Ok(format!("{:x}", digest.compute()))
}

fn encode_continuation_token(last_key: &str) -> String {
    general_purpose::STANDARD.encode(last_key)
}

fn decode_continuation_token(token: &str) -> StoreResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| StoreError::Listing("invalid continuation token".into()))
}

#[async_trait]
impl ObjectLister for LocalStore {
    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> StoreResult<ListPage> {
        let max_keys = max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_OBJECT);
        builder.push(" WHERE is_deleted = 0");

        // Exact prefix match; LIKE would treat `_` in `cat_` as a wildcard.
        if !prefix.is_empty() {
            builder.push(" AND key >= ");
            builder.push_bind(prefix.to_string());
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }

        if let Some(token) = continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(decode_continuation_token(token)?);
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<StoredObject> = builder
            .build_query_as::<StoredObject>()
            .fetch_all(&*self.db)
            .await
            .map_err(|err| StoreError::Listing(err.to_string()))?;

        let is_truncated = rows.len() == fetch_limit;
        if is_truncated {
            rows.pop();
        }
        let next_token = if is_truncated {
            rows.last().map(|last| encode_continuation_token(&last.key))
        } else {
            None
        };

        Ok(ListPage {
            entries: rows.iter().map(ObjectEntry::from).collect(),
            is_truncated,
            next_token,
        })
    }

    async fn generate_access_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        self.ensure_key_safe(key)?;
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp();

        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}/objects/{}?expires={}&signature={}",
            self.public_base_url,
            path,
            expires,
            self.signature(key, expires)?
        ))
    }

    async fn copy(&self, source_key: &str, dest_key: &str) -> StoreResult<()> {
        self.ensure_key_safe(source_key)?;
        self.ensure_key_safe(dest_key)?;
        let source = self.fetch_object(source_key).await?;

        let dest_path = self.object_path(dest_key);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(self.object_path(source_key), &dest_path)
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::NotFound(source_key.to_string())
                } else {
                    StoreError::Io(err)
                }
            })?;

        let etag = source.etag.unwrap_or_default();
        self.upsert_object(
            dest_key,
            source.size_bytes,
            &etag,
            self.clock.now(),
            Uuid::new_v4(),
        )
        .await?;
        debug!("copied {} to {}", source_key, dest_key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_key_safe(key)?;
        match self.fetch_object(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.ensure_key_safe(key)?;
        match self.fetch_object(key).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        }
        match fs::read(self.object_path(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{clock::ManualClock, lister::list_all};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::SqlitePoolOptions;

    struct Fixture {
        store: LocalStore,
        clock: Arc<ManualClock>,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn fixture(files: &[&str]) -> Fixture {
        let dir = std::env::temp_dir().join(format!("catcam-store-{}", Uuid::new_v4()));
        for file in files {
            let path = dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, file.as_bytes()).unwrap();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 10, 30, 12, 0, 0).unwrap(),
        ));
        let store = LocalStore::new(
            Arc::new(pool),
            dir.clone(),
            "http://localhost:3000/",
            SigningSecret::new("test-secret"),
            clock.clone(),
        );
        store.reindex().await.unwrap();
        Fixture { store, clock, dir }
    }

    #[tokio::test]
    async fn prefix_listing_is_exact_and_paged() {
        let fx = fixture(&[
            "cat_20251030_031000.jpg",
            "cat_20251030_032000.jpg",
            "cat_20251030_033000.jpg",
            "catX20251030_034000.jpg",
            "cat_20251031_000000.jpg",
            ".partial-upload",
        ])
        .await;

        let first = fx.store.list("cat_20251030_", 2, None).await.unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.entries.len(), 2);

        let all = list_all(&fx.store, "cat_20251030_", 2).await.unwrap();
        let keys: Vec<&str> = all.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "cat_20251030_031000.jpg",
                "cat_20251030_032000.jpg",
                "cat_20251030_033000.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn reindex_tracks_nested_and_removed_files() {
        let fx = fixture(&["cam/cat_20251030_031000.jpg", "cam/cat_20251030_032000.jpg"]).await;
        assert!(fx.store.exists("cam/cat_20251030_031000.jpg").await.unwrap());

        std::fs::remove_file(fx.dir.join("cam/cat_20251030_032000.jpg")).unwrap();
        let report = fx.store.reindex().await.unwrap();

        assert_eq!(report, ReindexReport { indexed: 1, removed: 1 });
        assert!(!fx.store.exists("cam/cat_20251030_032000.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn signed_urls_verify_until_expiry() {
        let fx = fixture(&["cat_20251030_031000.jpg"]).await;
        let key = "cat_20251030_031000.jpg";

        let url = fx
            .store
            .generate_access_url(key, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:3000/objects/cat_20251030_031000.jpg?expires="));

        let expires = fx.clock.now().timestamp() + 3600;
        let signature = url.rsplit("signature=").next().unwrap();
        fx.store.verify_access(key, expires, signature).unwrap();

        assert!(matches!(
            fx.store.verify_access(key, expires + 1, signature),
            Err(StoreError::Credential(_))
        ));

        fx.clock.advance(TimeDelta::hours(2));
        assert!(matches!(
            fx.store.verify_access(key, expires, signature),
            Err(StoreError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn forged_signatures_are_rejected() {
        let fx = fixture(&["cat_20251030_031000.jpg"]).await;
        let key = "cat_20251030_031000.jpg";
        let expires = fx.clock.now().timestamp() + 60;
        let other = fx.store.signature("cat_20251030_032000.jpg", expires).unwrap();

        for signature in [other.as_str(), "not base64!", ""] {
            assert!(matches!(
                fx.store.verify_access(key, expires, signature),
                Err(StoreError::Credential(_))
            ));
        }
    }

    #[tokio::test]
    async fn url_paths_are_percent_encoded() {
        let key = "cam roll/cat #1&2?.jpg";
        let fx = fixture(&[key]).await;

        let url = fx
            .store
            .generate_access_url(key, Duration::from_secs(60))
            .await
            .unwrap();

        let (path, query) = url.split_once('?').unwrap();
        assert_eq!(
            path,
            "http://localhost:3000/objects/cam%20roll/cat%20%231%262%3F.jpg"
        );
        let signature = query.rsplit("signature=").next().unwrap();
        let expires = fx.clock.now().timestamp() + 60;
        fx.store.verify_access(key, expires, signature).unwrap();
    }

    #[tokio::test]
    async fn cache_lifetime_follows_the_store_clock() {
        let fx = fixture(&[]).await;
        let expires = fx.clock.now().timestamp() + 600;

        assert_eq!(fx.store.seconds_until(expires), 600);
        fx.clock.advance(TimeDelta::minutes(15));
        assert_eq!(fx.store.seconds_until(expires), 0);
    }

    #[tokio::test]
    async fn reindexer_picks_up_new_uploads() {
        let fx = fixture(&["cat_20251030_031000.jpg"]).await;
        let store = Arc::new(fx.store.clone());
        let task = store.clone().spawn_reindexer(Duration::from_millis(20));

        std::fs::write(fx.dir.join("cat_20251030_032000.jpg"), b"img").unwrap();

        let mut found = false;
        for _ in 0..100 {
            if store.exists("cat_20251030_032000.jpg").await.unwrap() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert!(found, "upload never became visible");
    }

    #[tokio::test]
    async fn copy_creates_an_indexed_object() {
        let fx = fixture(&["cat_20251030_031000.jpg"]).await;

        fx.store
            .copy("cat_20251030_031000.jpg", "favourites/cat_20251030_031000.jpg")
            .await
            .unwrap();

        let copied = fx
            .store
            .get("favourites/cat_20251030_031000.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copied.as_ref(), b"cat_20251030_031000.jpg");
        assert!(matches!(
            fx.store.copy("missing.jpg", "favourites/missing.jpg").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let fx = fixture(&[]).await;
        for key in ["../etc/passwd", "/abs.jpg", "a\\b.jpg", ""] {
            assert!(matches!(
                fx.store.exists(key).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn readiness_checks_database_and_disk() {
        let fx = fixture(&["cat_20251030_031000.jpg"]).await;
        assert!(fx.store.readiness().await.is_ready());
    }
}
