//! Tracks which images in the current collection the user has marked.
//!
//! A fixed-length boolean vector, index-aligned with the ordered id list,
//! rebuilt whenever a new collection is supplied.

#[derive(Debug, Default)]
pub struct SelectionState {
    flags: Vec<bool>,
}

impl SelectionState {
    pub fn new(len: usize) -> Self {
        Self {
            flags: vec![false; len],
        }
    }

    /// Replaces the vector with an all-false one of `len` entries, matching
    /// a newly supplied collection.
    pub fn reset(&mut self, len: usize) {
        self.flags = vec![false; len];
    }

    /// Flips one entry. Out-of-range indices are ignored.
    pub fn toggle(&mut self, index: usize) {
        if let Some(flag) = self.flags.get_mut(index) {
            *flag = !*flag;
        }
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    /// The single select-all control: if every entry is already selected,
    /// clears them all; otherwise selects them all. One affordance serves
    /// both directions.
    pub fn select_all(&mut self) {
        if self.flags.iter().all(|&f| f) && !self.flags.is_empty() {
            self.flags.iter_mut().for_each(|f| *f = false);
        } else {
            self.flags.iter_mut().for_each(|f| *f = true);
        }
    }

    /// Clears every entry without the select-all tri-state behavior.
    pub fn clear(&mut self) {
        self.flags.iter_mut().for_each(|f| *f = false);
    }

    /// Indices of selected entries, ascending.
    pub fn selected_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect()
    }

    pub fn any_selected(&self) -> bool {
        self.flags.iter().any(|&f| f)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_single_entries() {
        let mut selection = SelectionState::new(3);
        selection.toggle(0);
        selection.toggle(2);

        assert!(selection.is_selected(0));
        assert!(!selection.is_selected(1));
        assert!(selection.is_selected(2));
        assert_eq!(selection.selected_indices(), vec![0, 2]);

        selection.toggle(0);
        assert!(!selection.is_selected(0));
    }

    #[test]
    fn select_all_sets_everything_when_any_unselected() {
        let mut selection = SelectionState::new(3);
        selection.toggle(1);

        selection.select_all();
        assert_eq!(selection.selected_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn select_all_clears_when_everything_selected() {
        let mut selection = SelectionState::new(3);
        selection.select_all();
        assert!(selection.any_selected());

        selection.select_all();
        assert!(!selection.any_selected());
        assert!(selection.selected_indices().is_empty());
    }

    #[test]
    fn reset_discards_previous_marks() {
        let mut selection = SelectionState::new(2);
        selection.toggle(0);

        selection.reset(4);
        assert_eq!(selection.len(), 4);
        assert!(!selection.any_selected());
    }

    #[test]
    fn out_of_range_toggle_is_ignored() {
        let mut selection = SelectionState::new(2);
        selection.toggle(9);
        assert!(!selection.any_selected());
        assert!(!selection.is_selected(9));
    }
}
