//! Update batcher: coalesces bursty notifications for presentation
//!
//! Flushes when the buffer is full or when the window since the first
//! buffered item has elapsed. The decision pipeline never goes through here.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct UpdateBatcher<T> {
    pending: Vec<T>,
    capacity: usize,
    window: Duration,
    opened_at: Option<Instant>,
}

impl<T> UpdateBatcher<T> {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            pending: Vec::new(),
            capacity: capacity.max(1),
            window,
            opened_at: None,
        }
    }

    /// Buffer an item; returns the batch if this filled it
    pub fn push(&mut self, item: T, now: Instant) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            self.opened_at = Some(now);
        }
        self.pending.push(item);
        (self.pending.len() >= self.capacity).then(|| self.flush())
    }

    /// Whether the window of the oldest buffered item has elapsed
    pub fn is_due(&self, now: Instant) -> bool {
        self.opened_at
            .is_some_and(|opened| now.duration_since(opened) >= self.window)
    }

    /// Take everything buffered
    pub fn flush(&mut self) -> Vec<T> {
        self.opened_at = None;
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_on_capacity() {
        let mut batcher = UpdateBatcher::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(batcher.push(1, now).is_none());
        assert!(batcher.push(2, now).is_none());
        assert_eq!(batcher.push(3, now), Some(vec![1, 2, 3]));
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_due_after_window() {
        let mut batcher = UpdateBatcher::new(10, Duration::from_millis(500));
        let start = Instant::now();
        assert!(!batcher.is_due(start));
        batcher.push("a", start);
        assert!(!batcher.is_due(start + Duration::from_millis(100)));
        assert!(batcher.is_due(start + Duration::from_millis(500)));
        assert_eq!(batcher.flush(), vec!["a"]);
        assert!(!batcher.is_due(start + Duration::from_secs(5)));
    }
}
