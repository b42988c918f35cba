//! Decoding of one message part into a displayable pixel buffer.
//!
//! Grid decodes probe the image bounds first, pick an integral power-of-two
//! downscale factor for the target cell size, then decode, resize, and
//! center-crop to a square. Export decodes take the full-resolution,
//! uncropped original from bytes the caller has already fetched.
//!
//! A missing part and undecodable bytes both come back as `None`: the slot
//! simply keeps its placeholder. Cancellation is cooperative, checked before
//! store I/O and before pixel decode.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::{trace, warn};

use crate::grid::cache::DecodedImage;
use crate::store::{ImageId, ImageStore};

/// Shared cancellation flag for one decode task.
///
/// Cancelling is a request, not preemption: a task past its last checkpoint
/// runs to completion, still lands in the cache, and is kept away from slot
/// state by the generation check instead.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Smallest power-of-two divisor such that `max(width, height) / factor`,
/// rounded up, fits within `fit_size`.
pub fn downscale_factor(width: u32, height: u32, fit_size: u32) -> u32 {
    let fit = fit_size.max(1);
    let mut factor = 1u32;
    while width.max(height).div_ceil(factor) > fit {
        factor *= 2;
    }
    factor
}

/// Loads `id` scaled and cropped for a grid cell of roughly `fit_size`
/// pixels. Returns `None` for a missing part, undecodable bytes, or an
/// observed cancellation.
pub fn load_fitted(
    store: &dyn ImageStore,
    store_root: &str,
    id: &ImageId,
    fit_size: u32,
    cancel: &CancelToken,
) -> Option<DecodedImage> {
    if cancel.is_cancelled() {
        return None;
    }
    let bytes = store.fetch(&id.location(store_root))?;
    if cancel.is_cancelled() {
        return None;
    }

    let (width, height) = decode_bounds(&bytes).or_else(|| {
        warn!(id = %id, "message part has undecodable image bounds");
        None
    })?;
    let factor = downscale_factor(width, height, fit_size);

    let image = decode_pixels(&bytes).or_else(|| {
        warn!(id = %id, "message part is not a decodable image");
        None
    })?;
    let image = if factor > 1 {
        image.resize_exact(
            (width / factor).max(1),
            (height / factor).max(1),
            FilterType::CatmullRom,
        )
    } else {
        image
    };
    let image = crop_square(image);

    trace!(id = %id, width = image.width(), height = image.height(), factor, "decoded for grid");
    Some(Arc::new(image.into_rgba8()))
}

/// Decodes already-fetched bytes at full resolution with no crop.
///
/// The export pipeline fetches on its own and calls this, so a missing
/// part and undecodable bytes stay distinguishable failures.
pub fn decode_full(bytes: &[u8]) -> Option<DecodedImage> {
    let image = decode_pixels(bytes)?;
    Some(Arc::new(image.into_rgba8()))
}

/// Decodes only the dimensions, not the pixels.
fn decode_bounds(bytes: &[u8]) -> Option<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    reader.into_dimensions().ok()
}

fn decode_pixels(bytes: &[u8]) -> Option<DynamicImage> {
    image::load_from_memory(bytes).ok()
}

/// Center-crops to a square whose side is the smaller dimension.
fn crop_square(image: DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width == height {
        return image;
    }
    let side = width.min(height);
    let x = width / 2 - side / 2;
    let y = height / 2 - side / 2;
    image.crop_imm(x, y, side, side)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    struct MemStore {
        parts: HashMap<String, Vec<u8>>,
    }

    impl ImageStore for MemStore {
        fn fetch(&self, location: &str) -> Option<Vec<u8>> {
            self.parts.get(location).cloned()
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn store_with(id: &str, bytes: Vec<u8>) -> MemStore {
        let mut parts = HashMap::new();
        parts.insert(ImageId::from(id).location("root"), bytes);
        MemStore { parts }
    }

    #[test]
    fn downscale_factor_is_smallest_fitting_power_of_two() {
        assert_eq!(downscale_factor(100, 100, 512), 1);
        assert_eq!(downscale_factor(512, 256, 512), 1);
        assert_eq!(downscale_factor(513, 100, 512), 2);
        assert_eq!(downscale_factor(4096, 2048, 512), 8);
        assert_eq!(downscale_factor(2048, 4096, 512), 8);

        // 1025 / 2 leaves a 513th pixel row, so halving is not enough.
        assert_eq!(downscale_factor(1025, 100, 512), 4);
    }

    #[test]
    fn fitted_load_downscales_and_crops_square() {
        let store = store_with("p", png_bytes(64, 32));
        let image = load_fitted(&store, "root", &ImageId::from("p"), 16, &CancelToken::new())
            .expect("decode should succeed");

        // Factor 4 gives 16x8, then the square crop takes the smaller side.
        assert_eq!((image.width(), image.height()), (8, 8));
    }

    #[test]
    fn small_source_is_not_upscaled() {
        let store = store_with("p", png_bytes(10, 10));
        let image = load_fitted(&store, "root", &ImageId::from("p"), 256, &CancelToken::new())
            .unwrap();
        assert_eq!((image.width(), image.height()), (10, 10));
    }

    #[test]
    fn full_decode_keeps_resolution_and_aspect() {
        let image = decode_full(&png_bytes(64, 32)).unwrap();
        assert_eq!((image.width(), image.height()), (64, 32));
    }

    #[test]
    fn missing_part_is_no_image_not_an_error() {
        let store = MemStore { parts: HashMap::new() };
        assert!(load_fitted(&store, "root", &ImageId::from("p"), 16, &CancelToken::new()).is_none());
    }

    #[test]
    fn garbage_bytes_are_no_image() {
        let store = store_with("p", b"definitely not an image".to_vec());
        assert!(load_fitted(&store, "root", &ImageId::from("p"), 16, &CancelToken::new()).is_none());
        assert!(decode_full(b"definitely not an image").is_none());
    }

    #[test]
    fn cancelled_token_short_circuits_before_fetch() {
        struct PanicStore;
        impl ImageStore for PanicStore {
            fn fetch(&self, _location: &str) -> Option<Vec<u8>> {
                panic!("cancelled task must not reach the store");
            }
        }

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(load_fitted(&PanicStore, "root", &ImageId::from("p"), 16, &cancel).is_none());
    }
}
