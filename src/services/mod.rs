//! The gallery core and the stores it runs against.
//!
//! Leaves first: `key_codec` and `lister` define keys and the store boundary;
//! `cache_controller`, `assembler` and `fetcher` build photos from listings;
//! `paginator` serves the newest-first feed; `gallery` ties one session
//! together. `local_store` and `memory_store` are the two store backends.

pub mod assembler;
pub mod cache_controller;
pub mod clock;
pub mod favourites;
pub mod fetcher;
pub mod gallery;
pub mod key_codec;
pub mod lister;
pub mod local_store;
pub mod memory_store;
pub mod metadata;
pub mod paginator;
