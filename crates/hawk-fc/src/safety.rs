use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Takeoff,
    Land,
}

/// Suppresses repeats of the same lifecycle command within `min_interval`
/// (a held key or a double-clicked button must not queue two takeoffs).
#[derive(Debug)]
pub struct LifecycleLimiter {
    last_takeoff: Option<Instant>,
    last_land: Option<Instant>,
    min_interval: Duration,
}

impl LifecycleLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { last_takeoff: None, last_land: None, min_interval }
    }

    pub fn allow(&mut self, what: Lifecycle) -> bool {
        let now = Instant::now();
        let slot = match what {
            Lifecycle::Takeoff => &mut self.last_takeoff,
            Lifecycle::Land => &mut self.last_land,
        };
        if let Some(t) = *slot {
            if now.duration_since(t) < self.min_interval { return false; }
        }
        *slot = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_interval_are_dropped() {
        let mut l = LifecycleLimiter::new(Duration::from_secs(60));
        assert!(l.allow(Lifecycle::Takeoff));
        assert!(!l.allow(Lifecycle::Takeoff));
        // independent per command
        assert!(l.allow(Lifecycle::Land));
    }

    #[test]
    fn zero_interval_never_limits() {
        let mut l = LifecycleLimiter::new(Duration::ZERO);
        assert!(l.allow(Lifecycle::Land));
        assert!(l.allow(Lifecycle::Land));
    }
}
