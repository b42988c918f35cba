//! Error taxonomy for the export pipeline.
//!
//! Grid-side failures are deliberately not errors: a missing or undecodable
//! message part leaves the slot's placeholder in place, and a completion for
//! a recycled slot is a silent no-op. Only the export pipeline surfaces
//! failures, and always as a single terminal error for the whole job.

use std::io;

use thiserror::Error;

use crate::store::ImageId;

#[derive(Debug, Error)]
pub enum Error {
    /// Export was triggered with nothing selected. Rejected synchronously,
    /// before any background work starts.
    #[error("no images selected")]
    EmptySelection,

    /// The message store returned no data for an id during export.
    #[error("image {0} is missing from the message store")]
    MissingImage(ImageId),

    /// The store bytes for an id could not be decoded during export.
    #[error("failed to decode image {0}")]
    Decode(ImageId),

    /// Re-encoding a decoded image for an archive entry failed.
    #[error("failed to encode image {0}")]
    Encode(ImageId),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
