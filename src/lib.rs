//! Browse time-ordered camera photos held in an object store.
//!
//! The store lists keys in ascending order by prefix only; this crate turns
//! that into a newest-first infinite feed, exact date-range views and cheap
//! polling refreshes, with signed access URLs cached per session.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
