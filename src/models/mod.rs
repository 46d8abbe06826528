//! Data models for the photo gallery.
//!
//! `object` holds what the store lists, `photo` what the browser sees, and
//! `metadata` the per-photo sensor payloads used by the graphing view.

pub mod metadata;
pub mod object;
pub mod photo;
