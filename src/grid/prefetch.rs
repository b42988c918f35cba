//! Look-ahead window computation and the session-long prefetch dedup set.
//!
//! The trigger threshold and batch size are tuning constants inherited from
//! scroll-feel testing, exposed through `GridConfig` rather than hard-coded
//! invariants.

use std::collections::HashSet;
use std::ops::Range;

use crate::store::ImageId;

/// How many ids one look-ahead batch decodes.
pub const DEFAULT_PREFETCH_BATCH: usize = 25;

/// Fire a prefetch when a foreground decode completes within this many
/// positions of the last visible slot.
pub const DEFAULT_PREFETCH_TRIGGER: usize = 10;

/// Ids for which a prefetch has already been issued this session.
///
/// Grows monotonically for the engine's lifetime, deliberately surviving
/// collection replacement, so a part is never batch-decoded twice.
#[derive(Debug, Default)]
pub struct PendingSet {
    issued: HashSet<ImageId>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as issued. Returns false if it already was.
    pub fn insert(&mut self, id: &ImageId) -> bool {
        if self.issued.contains(id) {
            return false;
        }
        self.issued.insert(id.clone())
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.issued.contains(id)
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

/// Index window of up to `count` items immediately after `last_visible`,
/// clipped to the end of a `total`-item collection.
pub fn lookahead_window(last_visible: usize, total: usize, count: usize) -> Range<usize> {
    let start = last_visible.saturating_add(1).min(total);
    let end = start.saturating_add(count).min(total);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_follows_last_visible() {
        assert_eq!(lookahead_window(4, 100, 25), 5..30);
    }

    #[test]
    fn window_clips_to_collection_end() {
        assert_eq!(lookahead_window(90, 100, 25), 91..100);
        assert_eq!(lookahead_window(99, 100, 25), 100..100);
        assert_eq!(lookahead_window(120, 100, 25), 100..100);
    }

    #[test]
    fn window_of_empty_collection_is_empty() {
        assert!(lookahead_window(0, 0, 25).is_empty());
    }

    #[test]
    fn pending_set_never_readmits() {
        let mut set = PendingSet::new();
        let id = ImageId::from("7");

        assert!(set.insert(&id));
        assert!(!set.insert(&id));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&id));
    }
}
