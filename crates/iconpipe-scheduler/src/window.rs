//! Sliding window of recent admission instants.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Admission instants within the last `span`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: Duration,
    admissions: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            admissions: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.admissions.push_back(at);
    }

    /// Forget admissions that are at least `span` old.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.admissions.front() {
            if now.saturating_duration_since(oldest) >= self.span {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.admissions.clear();
    }

    pub fn len(&self) -> usize {
        self.admissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admissions.is_empty()
    }

    /// Earliest instant at which fewer than `quota` admissions remain in
    /// the window, or `None` if there is room already. Call after `prune`.
    pub fn next_slot(&self, quota: usize) -> Option<Instant> {
        let len = self.admissions.len();
        if len < quota {
            return None;
        }
        self.admissions.get(len - quota).map(|&at| at + self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_drops_expired_entries() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(1));
        window.record(start);
        window.record(start + Duration::from_millis(400));

        window.prune(start + Duration::from_millis(999));
        assert_eq!(window.len(), 2);

        window.prune(start + Duration::from_secs(1));
        assert_eq!(window.len(), 1);

        window.prune(start + Duration::from_millis(1400));
        assert!(window.is_empty());
    }

    #[test]
    fn next_slot_when_full() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(1));
        assert_eq!(window.next_slot(2), None);

        window.record(start);
        window.record(start + Duration::from_millis(100));
        assert_eq!(window.next_slot(3), None);
        assert_eq!(window.next_slot(2), Some(start + Duration::from_secs(1)));

        window.record(start + Duration::from_millis(200));
        // Three in the window, quota two: the second-oldest must expire.
        assert_eq!(
            window.next_slot(2),
            Some(start + Duration::from_millis(1100))
        );
    }

    #[test]
    fn clear_opens_the_window() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(Duration::from_secs(1));
        window.record(start);
        window.clear();
        assert_eq!(window.next_slot(1), None);
    }
}
