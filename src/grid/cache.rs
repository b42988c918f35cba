//! Byte-bounded in-memory cache of decoded images with LRU eviction.
//!
//! One cache instance is shared by every decode worker and the foreground
//! for the lifetime of the grid, so images stay warm across transient UI
//! teardown. All mutation happens under a single lock with short critical
//! sections; no pixel work ever runs while it is held.

use std::sync::Arc;

use image::RgbaImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::store::ImageId;

/// A decoded image, shared read-only between the cache and any slot
/// currently displaying it.
pub type DecodedImage = Arc<RgbaImage>;

/// RGBA pixel buffers.
const BYTES_PER_PIXEL: usize = 4;

/// Fraction of a total memory budget given to the cache.
const BUDGET_FRACTION: usize = 8;

/// Returns the raw pixel byte count of `image` (never the encoded file size).
pub fn image_size_bytes(image: &RgbaImage) -> usize {
    image.width() as usize * image.height() as usize * BYTES_PER_PIXEL
}

struct CacheEntry {
    image: DecodedImage,
    size_bytes: usize,
}

struct CacheInner {
    entries: LruCache<ImageId, CacheEntry>,
    used_bytes: usize,
}

/// LRU image cache bounded by total pixel bytes rather than entry count.
///
/// Invariants after every mutation: `used_bytes` equals the sum of resident
/// entry sizes and never exceeds `capacity_bytes`. Eviction happens only on
/// `put`; a `get` promotes recency.
pub struct ImageCache {
    inner: Mutex<CacheInner>,
    capacity_bytes: usize,
}

impl ImageCache {
    /// Creates a cache holding at most `capacity_bytes` of decoded pixels.
    /// Capacity is fixed for the cache's lifetime.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                // Bounded by bytes below, never by entry count.
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
            capacity_bytes,
        }
    }

    /// Creates a cache sized to a fixed fraction of `total_bytes`, the
    /// overall memory budget of the hosting process.
    pub fn with_memory_budget(total_bytes: usize) -> Self {
        Self::new(total_bytes / BUDGET_FRACTION)
    }

    /// Looks up `id`, marking the entry most-recently-used on a hit.
    pub fn get(&self, id: &ImageId) -> Option<DecodedImage> {
        let mut inner = self.inner.lock();
        inner.entries.get(id).map(|entry| Arc::clone(&entry.image))
    }

    /// Inserts `image` under `id` unless the id is already resident: the
    /// first writer wins, so a duplicate concurrent decode never replaces
    /// stored pixels. Evicts least-recently-used entries until the new entry
    /// fits. An image larger than the whole cache is rejected outright,
    /// leaving the cache unchanged.
    ///
    /// Returns true if the image was inserted.
    pub fn put(&self, id: ImageId, image: DecodedImage) -> bool {
        let size_bytes = image_size_bytes(&image);
        if size_bytes > self.capacity_bytes {
            trace!(id = %id, size_bytes, "image exceeds cache capacity, not caching");
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.entries.contains(&id) {
            return false;
        }

        while inner.used_bytes + size_bytes > self.capacity_bytes {
            match inner.entries.pop_lru() {
                Some((evicted_id, evicted)) => {
                    inner.used_bytes -= evicted.size_bytes;
                    trace!(
                        id = %evicted_id,
                        freed_bytes = evicted.size_bytes,
                        used_bytes = inner.used_bytes,
                        "evicted image"
                    );
                }
                None => break,
            }
        }

        inner.used_bytes += size_bytes;
        inner.entries.put(id, CacheEntry { image, size_bytes });
        true
    }

    /// Returns true if `id` is resident. Does not promote recency.
    pub fn contains(&self, id: &ImageId) -> bool {
        self.inner.lock().entries.contains(id)
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 1 x `pixels` image occupying exactly `pixels * 4` bytes.
    fn test_image(pixels: u32) -> DecodedImage {
        Arc::new(RgbaImage::new(1, pixels))
    }

    #[test]
    fn used_bytes_tracks_resident_entries() {
        // 400-byte capacity, 160-byte entries: two fit, a third evicts.
        let cache = ImageCache::new(400);

        assert!(cache.put(ImageId::from("a"), test_image(40)));
        assert_eq!(cache.used_bytes(), 160);

        assert!(cache.put(ImageId::from("b"), test_image(40)));
        assert_eq!(cache.used_bytes(), 320);

        assert!(cache.put(ImageId::from("c"), test_image(40)));
        assert_eq!(cache.used_bytes(), 320);
        assert_eq!(cache.len(), 2);
        assert!(cache.used_bytes() <= cache.capacity_bytes());
        assert!(!cache.contains(&ImageId::from("a")));
    }

    #[test]
    fn get_promotes_recency() {
        let cache = ImageCache::new(400);
        cache.put(ImageId::from("a"), test_image(40));
        cache.put(ImageId::from("b"), test_image(40));

        // Touch "a" so that "b" becomes the eviction candidate.
        assert!(cache.get(&ImageId::from("a")).is_some());

        cache.put(ImageId::from("c"), test_image(40));
        assert!(cache.contains(&ImageId::from("a")));
        assert!(!cache.contains(&ImageId::from("b")));
        assert!(cache.contains(&ImageId::from("c")));
    }

    #[test]
    fn oversized_insert_is_rejected_unchanged() {
        let cache = ImageCache::new(400);
        cache.put(ImageId::from("a"), test_image(40));

        assert!(!cache.put(ImageId::from("huge"), test_image(120)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 160);
        assert!(cache.contains(&ImageId::from("a")));
    }

    #[test]
    fn first_writer_wins_for_duplicate_ids() {
        let cache = ImageCache::new(4096);
        let first = test_image(10);
        assert!(cache.put(ImageId::from("a"), Arc::clone(&first)));

        // A losing duplicate decode must not replace the stored pixels.
        assert!(!cache.put(ImageId::from("a"), test_image(20)));
        let stored = cache.get(&ImageId::from("a")).unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
        assert_eq!(cache.used_bytes(), 40);
    }

    #[test]
    fn multiple_evictions_make_room_for_one_insert() {
        let cache = ImageCache::new(400);
        cache.put(ImageId::from("a"), test_image(25)); // 100 bytes
        cache.put(ImageId::from("b"), test_image(25));
        cache.put(ImageId::from("c"), test_image(25));

        // 240 bytes only fits after evicting both "a" and "b".
        assert!(cache.put(ImageId::from("d"), test_image(60)));
        assert!(!cache.contains(&ImageId::from("a")));
        assert!(!cache.contains(&ImageId::from("b")));
        assert!(cache.contains(&ImageId::from("c")));
        assert_eq!(cache.used_bytes(), 340);
    }

    #[test]
    fn memory_budget_uses_an_eighth() {
        let cache = ImageCache::with_memory_budget(3200);
        assert_eq!(cache.capacity_bytes(), 400);
    }
}
