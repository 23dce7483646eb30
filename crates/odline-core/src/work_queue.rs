//! Lock-free distribution of splits across workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out each item exactly once, together with its position.
///
/// Workers loop on [`next()`](WorkQueue::next) until it returns `None`.
pub struct WorkQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item and its index
    pub fn next(&self) -> Option<(usize, &T)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items not yet claimed
    pub fn remaining(&self) -> usize {
        self.total()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}
