//! Feed liveness: has anything arrived recently?

#[derive(Debug, Clone)]
pub struct LivenessTracker {
    last_observed: Option<i64>,
    stale_after_ms: f64,
}

impl LivenessTracker {
    pub fn new(stale_after_ms: f64) -> Self {
        Self {
            last_observed: None,
            stale_after_ms,
        }
    }

    /// Record the receipt time (µs) of the latest event.
    pub fn update(&mut self, local_time: i64) {
        self.last_observed = Some(local_time);
    }

    /// Never stale before the first observation.
    pub fn is_stale(&self, now: i64) -> bool {
        match self.last_observed {
            Some(last) => now.saturating_sub(last) as f64 / 1000.0 > self.stale_after_ms,
            None => false,
        }
    }

    pub fn last_observed(&self) -> Option<i64> {
        self.last_observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_stale_before_first_event() {
        let t = LivenessTracker::new(5_000.0);
        assert!(!t.is_stale(i64::MAX / 2));
    }

    #[test]
    fn test_stale_threshold_is_exclusive() {
        let mut t = LivenessTracker::new(5_000.0);
        t.update(1_000_000);
        assert!(!t.is_stale(1_000_000 + 5_000_000));
        assert!(t.is_stale(1_000_000 + 5_000_001));
    }

    #[test]
    fn test_zero_timestamp_counts_as_observed() {
        let mut t = LivenessTracker::new(5_000.0);
        t.update(0);
        assert!(t.is_stale(6_000_000));
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let mut t = LivenessTracker::new(5_000.0);
        t.update(i64::MAX);
        assert!(!t.is_stale(i64::MIN));
        t.update(i64::MIN);
        assert!(t.is_stale(i64::MAX));
    }
}
