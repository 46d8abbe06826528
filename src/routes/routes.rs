//! Defines routes for the gallery API.
//!
//! ## Structure
//! - **Feed**
//!   - `GET  /photos`: newest-first page (`?page=&page_size=`)
//!   - `GET  /photos/range`: explicit window (`?start=&end=`, RFC 3339)
//!   - `GET  /photos/since`: strictly newer than `?since=`
//!   - `POST /photos/refresh`: merge new arrivals into the feed
//!   - `POST /photos/reset`: drop the feed
//!   - `GET  /photos/metadata`: sensor readings and trends for a window
//!
//! - **Session**
//!   - `POST /session/logout`
//!
//! - **Favourites**
//!   - `GET  /favourites`
//!   - `GET  /favourites/{*key}`: is this photo a favourite?
//!   - `POST /favourites/{*key}`
//!
//! - **Objects** (targets of signed access URLs)
//!   - `GET|HEAD /objects/{*key}?expires=&signature=`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
        photo_handlers::{
            add_favourite, favourite_status, list_favourites, list_photos, logout,
            photo_metadata, photos_in_range, photos_since, refresh_photos, reset_photos,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Feed
        .route("/photos", get(list_photos))
        .route("/photos/range", get(photos_in_range))
        .route("/photos/since", get(photos_since))
        .route("/photos/refresh", post(refresh_photos))
        .route("/photos/reset", post(reset_photos))
        .route("/photos/metadata", get(photo_metadata))
        // Session
        .route("/session/logout", post(logout))
        // Favourites
        .route("/favourites", get(list_favourites))
        .route(
            "/favourites/{*key}",
            get(favourite_status).post(add_favourite),
        )
        // Signed object access
        .route("/objects/{*key}", get(get_object).head(head_object))
}
