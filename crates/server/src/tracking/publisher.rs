//! Snapshot publication throttling.

use std::time::{Duration, Instant};

/// Global publish throttle shared across all entity classes.
///
/// A single timestamp gates the whole multi-class snapshot: a frame boundary
/// on one class releases (or withholds) every class's current state
/// together, so consumers always see one coherent snapshot per publish.
#[derive(Debug)]
pub struct ThrottledPublisher {
    interval: Duration,
    last_published: Option<Instant>,
}

impl ThrottledPublisher {
    /// Default interval, a ~60 Hz publication ceiling.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_published: None,
        }
    }

    /// Whether a snapshot may go out at `now`. Records the publication when
    /// it does; a suppressed frame is coalesced into the next eligible one.
    pub fn should_publish(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_published {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_published = Some(now);
        true
    }
}

impl Default for ThrottledPublisher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_always_publishes() {
        let mut publisher = ThrottledPublisher::new(Duration::from_millis(16));
        assert!(publisher.should_publish(Instant::now()));
    }

    #[test]
    fn frames_within_interval_are_suppressed() {
        let mut publisher = ThrottledPublisher::new(Duration::from_millis(16));
        let start = Instant::now();
        assert!(publisher.should_publish(start));
        assert!(!publisher.should_publish(start + Duration::from_millis(5)));
        assert!(!publisher.should_publish(start + Duration::from_millis(15)));
        assert!(publisher.should_publish(start + Duration::from_millis(16)));
    }

    #[test]
    fn suppressed_frame_does_not_reset_window() {
        let mut publisher = ThrottledPublisher::new(Duration::from_millis(10));
        let start = Instant::now();
        assert!(publisher.should_publish(start));
        assert!(!publisher.should_publish(start + Duration::from_millis(9)));
        // window still measures from the last publication, not the attempt
        assert!(publisher.should_publish(start + Duration::from_millis(10)));
    }
}
