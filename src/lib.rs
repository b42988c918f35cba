//! msgpix - asynchronous loading, caching, and batch export of message
//! attachment images.
//!
//! The crate has two halves that share a store abstraction but nothing
//! else:
//!
//! - [`grid`]: a [`GridEngine`] that fills recyclable view slots with
//!   downscaled square crops, backed by a worker pool, a byte-budgeted LRU
//!   cache, and scroll look-ahead.
//! - [`export`]: a sequential, cancellable pipeline that re-encodes
//!   selected images into a single zip archive.
//!
//! Callers supply the storage side by implementing [`ImageStore`] (bytes
//! for a location) and optionally [`CollectionSupplier`] (ordered ids for
//! a conversation).

pub mod error;
pub mod export;
pub mod grid;
pub mod selection;
pub mod store;

pub use error::{Error, Result};
pub use export::{
    ExportFormat, ExportOutcome, ProgressObserver, ARCHIVE_FILE_NAME, ARCHIVE_MIME,
};
pub use grid::cache::{DecodedImage, ImageCache};
pub use grid::engine::{GridConfig, GridEngine, SlotContent, SlotUpdate};
pub use selection::SelectionState;
pub use store::{CollectionSupplier, ImageId, ImageStore};
