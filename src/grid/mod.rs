//! Asynchronous image grid pipeline.
//!
//! This module provides:
//! - `ImageCache` - Shared in-memory LRU cache with byte accounting
//! - `load_fitted` / `load_full` - Part decoding with cooperative cancel
//! - `SlotTable` - Generation-guarded bindings for recycled view slots
//! - `PendingSet` / `lookahead_window` - Scroll look-ahead bookkeeping
//! - `GridEngine` - Worker pool tying the above together

pub mod cache;
pub mod decode;
pub mod engine;
pub mod prefetch;
pub mod slots;
