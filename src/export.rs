//! Bundles a set of images into a single zip archive.
//!
//! The job is strictly sequential: one full-resolution decode and one
//! re-encode at a time, which bounds peak memory to a single image. Every
//! item is followed by a progress callback whose boolean return doubles as
//! the cancellation channel. An early stop closes the archive normally but
//! the whole job counts as cancelled; a decode/encode/write failure aborts
//! the job and removes the partial file so no half-written archive is ever
//! observable.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::{Error, Result};
use crate::grid::cache::DecodedImage;
use crate::grid::decode;
use crate::store::{ImageId, ImageStore};

/// Well-known per-session archive name; a new export overwrites the last.
pub const ARCHIVE_FILE_NAME: &str = "mms_images.zip";

/// MIME type handed to the sharing mechanism along with the archive path.
pub const ARCHIVE_MIME: &str = "application/zip";

/// Per-entry filename stem; entries are `mms_image_<i>.<ext>`.
const ENTRY_STEM: &str = "mms_image_";

/// Export keeps the source quality; the size/speed tradeoff is the format
/// choice itself.
const EXPORT_JPEG_QUALITY: u8 = 100;

/// Re-encoding format for archive entries. PNG is slow, JPEG is fast, with
/// the usual quality tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jpeg,
    Png,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Png => "png",
        }
    }
}

/// Receives `(completed, total)` after every archived image. Returning
/// false requests cancellation of the whole job.
pub trait ProgressObserver {
    fn on_progress(&self, completed: usize, total: usize) -> bool;
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize) -> bool,
{
    fn on_progress(&self, completed: usize, total: usize) -> bool {
        self(completed, total)
    }
}

/// Terminal state of an export job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed(PathBuf),
    /// The observer asked to stop. The file on disk is a discard, never a
    /// partial success; the caller is responsible for ignoring it.
    Cancelled,
}

/// Default directory for the session archive.
pub fn default_export_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "msgpix")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
}

/// Exports `ids` in caller order into `<out_dir>/mms_images.zip`.
///
/// Each image is fetched at full resolution straight from the store; the
/// grid cache holds downscaled crops and is bypassed in both directions,
/// even if a thumbnail decode of the same id is running concurrently
/// (accepted duplicate work).
pub fn export_images(
    store: &dyn ImageStore,
    store_root: &str,
    ids: &[ImageId],
    format: ExportFormat,
    out_dir: &Path,
    observer: &dyn ProgressObserver,
) -> Result<ExportOutcome> {
    if ids.is_empty() {
        return Err(Error::EmptySelection);
    }

    std::fs::create_dir_all(out_dir)?;
    let archive_path = out_dir.join(ARCHIVE_FILE_NAME);

    match write_archive(store, store_root, ids, format, &archive_path, observer) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(error = %err, "export failed, removing partial archive");
            let _ = std::fs::remove_file(&archive_path);
            Err(err)
        }
    }
}

fn write_archive(
    store: &dyn ImageStore,
    store_root: &str,
    ids: &[ImageId],
    format: ExportFormat,
    archive_path: &Path,
    observer: &dyn ProgressObserver,
) -> Result<ExportOutcome> {
    let total = ids.len();
    debug!(total, path = ?archive_path, "starting export");

    let file = File::create(archive_path)?;
    let mut archive = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default();

    for (index, id) in ids.iter().enumerate() {
        let bytes = store
            .fetch(&id.location(store_root))
            .ok_or_else(|| Error::MissingImage(id.clone()))?;
        let image = decode::decode_full(&bytes).ok_or_else(|| Error::Decode(id.clone()))?;
        let entry = encode_entry(&image, format, id)?;

        archive.start_file(format!("{ENTRY_STEM}{index}.{}", format.extension()), options)?;
        archive.write_all(&entry)?;

        if !observer.on_progress(index + 1, total) {
            archive.finish()?.flush()?;
            debug!(completed = index + 1, total, "export cancelled by observer");
            return Ok(ExportOutcome::Cancelled);
        }
    }

    archive.finish()?.flush()?;
    debug!(total, path = ?archive_path, "export complete");
    Ok(ExportOutcome::Completed(archive_path.to_path_buf()))
}

/// Re-encodes one decoded image into in-memory entry bytes.
fn encode_entry(image: &DecodedImage, format: ExportFormat, id: &ImageId) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        ExportFormat::Jpeg => {
            // JPEG carries no alpha channel.
            let rgb = DynamicImage::ImageRgba8((**image).clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buf, EXPORT_JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
                .map_err(|_| Error::Encode(id.clone()))?;
        }
        ExportFormat::Png => {
            let encoder = PngEncoder::new(&mut buf);
            image
                .write_with_encoder(encoder)
                .map_err(|_| Error::Encode(id.clone()))?;
        }
    }
    Ok(buf)
}
