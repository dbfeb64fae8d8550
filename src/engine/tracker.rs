//! Outstanding-request tracking.
//!
//! Exactly one request may be outstanding at a time. Dispatching a new one
//! supersedes whatever was current: the old identifier is returned so the
//! caller can log it, and any response still in flight for it will be
//! dropped by identifier when it arrives.

use tokio::time::Instant;

/// Unique identifier for a dispatched request.
pub type RequestId = u64;

/// Tracks the single current outstanding request and its deadline.
#[derive(Debug, Default)]
pub struct RequestTracker {
    next_id: RequestId,
    current: Option<(RequestId, Instant)>,
}

impl RequestTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new request with the given deadline.
    ///
    /// Returns the fresh identifier and the superseded one, if a request was
    /// still outstanding.
    pub fn begin(&mut self, deadline: Instant) -> (RequestId, Option<RequestId>) {
        self.next_id += 1;
        let id = self.next_id;
        let superseded = self.current.replace((id, deadline)).map(|(old, _)| old);
        (id, superseded)
    }

    /// The current outstanding request, if any.
    pub fn current(&self) -> Option<RequestId> {
        self.current.map(|(id, _)| id)
    }

    /// Deadline of the current outstanding request, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.map(|(_, deadline)| deadline)
    }

    /// Whether `id` is the current outstanding request.
    pub fn is_current(&self, id: RequestId) -> bool {
        self.current() == Some(id)
    }

    /// Terminate `id` if it is still current.
    pub fn finish(&mut self, id: RequestId) {
        if self.is_current(id) {
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_begin_assigns_fresh_ids() {
        let mut tracker = RequestTracker::new();
        let deadline = Instant::now() + Duration::from_secs(1);

        let (first, superseded) = tracker.begin(deadline);
        assert!(superseded.is_none());
        assert!(tracker.is_current(first));

        let (second, superseded) = tracker.begin(deadline);
        assert_ne!(first, second);
        assert_eq!(superseded, Some(first));
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
    }

    #[tokio::test]
    async fn test_finish_clears_only_current() {
        let mut tracker = RequestTracker::new();
        let deadline = Instant::now() + Duration::from_secs(1);

        let (first, _) = tracker.begin(deadline);
        let (second, _) = tracker.begin(deadline);

        tracker.finish(first);
        assert!(tracker.is_current(second));

        tracker.finish(second);
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.deadline(), None);
    }
}
