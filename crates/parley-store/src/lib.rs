//! # parley-store
//!
//! Local persistence for the Parley client engine.  The crate exposes a
//! synchronous [`Database`] handle wrapping a `rusqlite::Connection`, with a
//! versioned per-channel message cache and a handful of client settings on
//! top.  Everything here is best-effort from the caller's perspective: a
//! broken cache is an empty cache, never an error surfaced to the user.

pub mod cache;
pub mod database;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
