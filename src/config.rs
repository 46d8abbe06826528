use crate::services::{
    favourites::DEFAULT_FAVOURITES_PREFIX,
    fetcher::FetchOptions,
    gallery::GallerySettings,
    lister::MAX_LIST_KEYS,
    local_store::SigningSecret,
    paginator::DEFAULT_HORIZON_DAYS,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL browsers reach this service at; signed URLs point here.
    pub public_base_url: String,
    pub signing_secret: SigningSecret,
    pub url_ttl_secs: u64,
    pub url_refresh_margin_secs: u64,
    pub horizon_days: u64,
    pub batch_size: usize,
    pub list_page_size: usize,
    pub key_root: String,
    pub favourites_prefix: String,
    pub default_page_size: usize,
    /// Seconds between background reindexes of `storage_dir`; 0 disables.
    pub reindex_secs: u64,
}

/// What to do after configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reindex,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Browse and page through camera photos in an object store")]
pub struct Args {
    /// Host to bind to (overrides CATCAM_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CATCAM_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the photos (overrides CATCAM_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL of the object index (overrides CATCAM_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL used in signed photo URLs (overrides CATCAM_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Lifetime of signed photo URLs in seconds (overrides CATCAM_URL_TTL_SECS)
    #[arg(long)]
    pub url_ttl_secs: Option<u64>,

    /// Days back from today after which paging stops (overrides CATCAM_HORIZON_DAYS)
    #[arg(long)]
    pub horizon_days: Option<u64>,

    /// Seconds between background reindexes, 0 to disable (overrides CATCAM_REINDEX_SECS)
    #[arg(long)]
    pub reindex_secs: Option<u64>,

    /// Prefix photo keys live under (overrides CATCAM_KEY_ROOT)
    #[arg(long)]
    pub key_root: Option<String>,

    /// Apply the index schema and exit
    #[arg(long)]
    pub migrate: bool,

    /// Index the storage directory and exit
    #[arg(long, conflicts_with = "migrate")]
    pub reindex: bool,
}

/// Parse `name` from the environment, or fall back to `default` if unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_string("CATCAM_HOST", "0.0.0.0");
        let env_port = env_or("CATCAM_PORT", 3000u16)?;
        let env_storage = env_string("CATCAM_STORAGE_DIR", "./data/photos");
        let env_db = env_string("CATCAM_DATABASE_URL", "sqlite://./data/meta/catcam.db");
        let env_ttl = env_or("CATCAM_URL_TTL_SECS", 3600u64)?;
        let env_horizon = env_or("CATCAM_HORIZON_DAYS", DEFAULT_HORIZON_DAYS)?;
        let env_key_root = env_string("CATCAM_KEY_ROOT", "");
        let env_reindex = env_or("CATCAM_REINDEX_SECS", 60u64)?;

        let port = args.port.unwrap_or(env_port);
        let env_public = env::var("CATCAM_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let signing_secret = match env::var("CATCAM_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("CATCAM_SIGNING_SECRET not set; generating a per-process secret");
                uuid::Uuid::new_v4().to_string()
            }
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            signing_secret: SigningSecret::new(signing_secret),
            url_ttl_secs: args.url_ttl_secs.unwrap_or(env_ttl),
            url_refresh_margin_secs: env_or("CATCAM_URL_REFRESH_MARGIN_SECS", 300u64)?,
            horizon_days: args.horizon_days.unwrap_or(env_horizon),
            batch_size: env_or("CATCAM_BATCH_SIZE", 5usize)?.max(1),
            list_page_size: env_or("CATCAM_LIST_PAGE_SIZE", MAX_LIST_KEYS)?.clamp(1, MAX_LIST_KEYS),
            key_root: args.key_root.unwrap_or(env_key_root),
            favourites_prefix: env_string("CATCAM_FAVOURITES_PREFIX", DEFAULT_FAVOURITES_PREFIX),
            default_page_size: env_or("CATCAM_PAGE_SIZE", 30usize)?.max(1),
            reindex_secs: args.reindex_secs.unwrap_or(env_reindex),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reindex {
            RunMode::Reindex
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reindex_interval(&self) -> Option<Duration> {
        (self.reindex_secs > 0).then_some(Duration::from_secs(self.reindex_secs))
    }

    pub fn gallery_settings(&self) -> GallerySettings {
        GallerySettings {
            fetch: FetchOptions {
                key_root: self.key_root.clone(),
                list_page_size: self.list_page_size,
            },
            url_ttl: Duration::from_secs(self.url_ttl_secs),
            url_refresh_margin: Duration::from_secs(self.url_refresh_margin_secs),
            batch_size: self.batch_size,
            horizon_days: self.horizon_days,
            favourites_prefix: self.favourites_prefix.clone(),
        }
    }
}
