//! Lock-free queue handing listing URLs to extraction workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed list of items claimed one at a time by concurrent workers.
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

    /// Keep only items passing `keep` (e.g. URLs not yet harvested).
    pub fn filtered(items: Vec<T>, keep: impl Fn(&T) -> bool) -> Self {
        let items: Vec<T> = items.into_iter().filter(|s| keep(s)).collect();
        log::debug!("{} items in work queue", items.len());
        Self::new(items)
    }

    /// Claim the next item.
    pub fn next(&self) -> Option<&T> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order() {
        let q = WorkQueue::new(vec!["a", "b"]);
        assert_eq!(q.total(), 2);
        assert_eq!(q.next(), Some(&"a"));
        assert_eq!(q.next(), Some(&"b"));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn filtered_skips() {
        let q = WorkQueue::filtered(vec![1, 2, 3, 4], |x| *x % 2 == 0);
        assert_eq!(q.total(), 2);
        assert_eq!(q.next(), Some(&2));
        assert_eq!(q.next(), Some(&4));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let q = WorkQueue::new((0..1000).collect::<Vec<_>>());
        let seen = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    while let Some(i) = q.next() {
                        seen.lock().unwrap().push(*i);
                    }
                });
            }
        });
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
