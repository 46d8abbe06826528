use anyhow::Result;
use axum::Router;
use catcam_gallery::{
    config::{AppConfig, RunMode},
    routes,
    services::{
        clock::{Clock, SystemClock},
        gallery::Gallery,
        local_store::{self, LocalStore},
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting catcam-gallery ({:?}) with config: {:?}", mode, cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite index ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(LocalStore::new(
        db.clone(),
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
        cfg.signing_secret.clone(),
        clock.clone(),
    ));

    // --- One-shot modes ---
    match mode {
        RunMode::Migrate => {
            local_store::migrate(&db).await?;
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::Reindex => {
            let report = store.reindex().await?;
            tracing::info!(
                "Reindex complete: {} objects indexed, {} removed.",
                report.indexed,
                report.removed
            );
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // --- Keep the index in step with the storage directory ---
    match store.reindex().await {
        Ok(report) => tracing::info!(
            "Startup reindex: {} objects indexed, {} removed.",
            report.indexed,
            report.removed
        ),
        Err(err) => tracing::error!("Startup reindex failed: {}", err),
    }
    let _reindexer = match cfg.reindex_interval() {
        Some(period) => {
            tracing::info!("Reindexing every {:?}", period);
            Some(store.clone().spawn_reindexer(period))
        }
        None => None,
    };

    // --- Initialize the browsing session ---
    let gallery = Arc::new(Gallery::new(store.clone(), clock, cfg.gallery_settings()));
    let state = AppState {
        gallery,
        store,
        default_page_size: cfg.default_page_size,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
