use crate::services::{gallery::Gallery, local_store::LocalStore};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gallery: Arc<Gallery>,
    pub store: Arc<LocalStore>,
    pub default_page_size: usize,
}
