//! HTTP handlers for the photo feed, range views, refreshes, metadata and
//! favourites. Each handler is a thin call into the session `Gallery`.

use crate::{
    errors::AppError,
    models::{
        metadata::{MetadataBatch, TrendPoint},
        photo::Photo,
    },
    services::{gallery::Refresh, metadata::trend_series},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default span of a range view when no start is given.
const DEFAULT_RANGE_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub photos: Vec<Photo>,
    pub has_more: bool,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Serialize)]
pub struct RangeResponse {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub photos: Vec<Photo>,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    #[serde(flatten)]
    pub batch: MetadataBatch,
    pub warning: Option<String>,
    pub trends: BTreeMap<String, Vec<TrendPoint>>,
}

#[derive(Debug, Serialize)]
pub struct FavouriteResponse {
    pub key: String,
    pub added: bool,
}

#[derive(Debug, Serialize)]
pub struct FavouriteStatus {
    pub key: String,
    pub favourite: bool,
}

#[derive(Debug, Serialize)]
pub struct FavouritesResponse {
    pub favourites: Vec<String>,
}

impl RangeQuery {
    /// Fill in missing bounds: `end` defaults to now, `start` to a day
    /// before `end`.
    fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or_else(|| end - TimeDelta::hours(DEFAULT_RANGE_HOURS));
        (start, end)
    }
}

/// GET `/photos?page=&page_size=`: one page of the newest-first feed.
pub async fn list_photos(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PageResponse>, AppError> {
    let page = q.page.unwrap_or(0);
    let page_size = q.page_size.unwrap_or(state.default_page_size);
    if page_size == 0 {
        return Err(AppError::bad_request("page_size must be at least 1"));
    }

    let result = state.gallery.page(page_size, page).await?;
    Ok(Json(PageResponse {
        photos: result.photos,
        has_more: result.has_more,
        page,
        page_size,
    }))
}

/// GET `/photos/range?start=&end=`: every photo in an explicit window.
pub async fn photos_in_range(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<RangeResponse>, AppError> {
    let (start, end) = q.resolve(state.gallery.now());
    if end < start {
        return Err(AppError::bad_request("end must not precede start"));
    }

    let photos = state.gallery.range(start, end).await?;
    Ok(Json(RangeResponse { start, end, photos }))
}

/// GET `/photos/since?since=`: photos strictly newer than `since`.
pub async fn photos_since(
    State(state): State<AppState>,
    Query(q): Query<SinceQuery>,
) -> Json<Refresh> {
    Json(state.gallery.since(q.since).await)
}

/// POST `/photos/refresh`: pull in photos newer than the feed's newest.
pub async fn refresh_photos(State(state): State<AppState>) -> Json<Refresh> {
    Json(state.gallery.refresh().await)
}

/// POST `/photos/reset`: drop the feed and start again from today.
pub async fn reset_photos(State(state): State<AppState>) -> StatusCode {
    state.gallery.reset().await;
    StatusCode::NO_CONTENT
}

/// GET `/photos/metadata?start=&end=`: sensor readings for the graphing view.
pub async fn photo_metadata(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<MetadataResponse>, AppError> {
    let (start, end) = q.resolve(state.gallery.now());
    let batch = state.gallery.metadata(start, end).await?;
    let warning = batch.warning();
    let trends = trend_series(&batch);

    Ok(Json(MetadataResponse {
        batch,
        warning,
        trends,
    }))
}

/// POST `/session/logout`: forget every credential-derived cache.
pub async fn logout(State(state): State<AppState>) -> StatusCode {
    state.gallery.logout().await;
    StatusCode::NO_CONTENT
}

/// GET `/favourites`
pub async fn list_favourites(
    State(state): State<AppState>,
) -> Result<Json<FavouritesResponse>, AppError> {
    let favourites = state.gallery.favourites().await?;
    Ok(Json(FavouritesResponse { favourites }))
}

/// GET `/favourites/{*key}`: whether a photo is a favourite.
pub async fn favourite_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<FavouriteStatus>, AppError> {
    let favourite = state.gallery.is_favourite(&key).await?;
    Ok(Json(FavouriteStatus { key, favourite }))
}

/// POST `/favourites/{*key}`: copy a photo into favourites.
pub async fn add_favourite(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let added = state.gallery.add_favourite(&key).await?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(FavouriteResponse { key, added })))
}
