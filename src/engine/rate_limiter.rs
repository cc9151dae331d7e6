use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding-window rate limiter for repeated log warnings
///
/// Tracks recent events and enforces a maximum count per time window.
///
/// # Example
/// ```
/// use chrono::Duration;
/// use monitrace::engine::RateLimiter;
///
/// let mut limiter = RateLimiter::new(2, Duration::seconds(10));
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum number of events allowed per window
    max_per_window: usize,
    window: Duration,
    /// Timestamps of recent events (within the last window)
    recent_events: VecDeque<DateTime<Utc>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(1, Duration::seconds(10)) // Default: one line per 10 seconds
    }
}

impl RateLimiter {
    /// Create a limiter
    ///
    /// # Arguments
    ///
    /// * `max_per_window` - Events allowed within any one window
    /// * `window` - Length of the sliding window
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            recent_events: VecDeque::new(),
        }
    }

    /// Check if an event can be emitted now without exceeding the limit
    pub fn can_send(&mut self) -> bool {
        self.cleanup_old_events(Utc::now());
        self.recent_events.len() < self.max_per_window
    }

    /// Record an event now, whether or not the limit allows it
    pub fn record_event(&mut self) {
        self.record_event_at(Utc::now());
    }

    /// Record an event at a specific time
    ///
    /// Primarily used for testing with controlled timestamps.
    pub fn record_event_at(&mut self, timestamp: DateTime<Utc>) {
        self.recent_events.push_back(timestamp);
        self.cleanup_old_events(Utc::now());
    }

    /// Check and record in one step; returns true if the event may be emitted
    pub fn try_acquire(&mut self) -> bool {
        if self.can_send() {
            self.record_event();
            true
        } else {
            false
        }
    }

    /// Number of events in the current window
    pub fn current_count(&mut self) -> usize {
        self.cleanup_old_events(Utc::now());
        self.recent_events.len()
    }

    fn cleanup_old_events(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        // Events may be recorded out of order, so scan the whole queue
        self.recent_events.retain(|&time| time > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let mut limiter = RateLimiter::new(3, Duration::minutes(1));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // Fourth should be blocked
        assert!(!limiter.can_send());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_rate_limiter_cleanup_old_events() {
        let mut limiter = RateLimiter::new(2, Duration::seconds(10));
        let now = Utc::now();

        limiter.record_event_at(now - Duration::seconds(30));
        limiter.record_event_at(now - Duration::seconds(5));

        // The old event falls outside the window
        assert!(limiter.can_send());
        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_rate_limiter_sliding_window() {
        let mut limiter = RateLimiter::new(2, Duration::minutes(1));
        let now = Utc::now();

        limiter.record_event_at(now - Duration::seconds(30));
        limiter.record_event_at(now - Duration::seconds(10));
        assert!(!limiter.can_send());

        // 35 seconds later the first event has expired
        limiter.cleanup_old_events(now + Duration::seconds(35));
        assert_eq!(limiter.recent_events.len(), 1);
    }

    #[test]
    fn test_default_is_one_per_ten_seconds() {
        let mut limiter = RateLimiter::default();
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.current_count(), 1);
    }
}
