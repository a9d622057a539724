use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Operations that are rate limited per session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    ConfigSet,
    HostCheck,
    HostWakeup,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigSet => "CONFIG.SET",
            Self::HostCheck => "HOST.CHECK",
            Self::HostWakeup => "HOST.WAKEUP",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Limit {
    pub max_requests: usize,
    pub window: Duration,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RateLimits {
    pub config_set: usize,
    pub host_check: usize,
    pub host_wakeup: usize,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            config_set: 10,
            host_check: 30,
            host_wakeup: 5,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimits {
    pub fn for_action(&self, action: Action) -> Limit {
        let max_requests = match action {
            Action::ConfigSet => self.config_set,
            Action::HostCheck => self.host_check,
            Action::HostWakeup => self.host_wakeup,
        };
        Limit {
            max_requests,
            window: self.window,
        }
    }
}

/// Timestamps of the requests admitted during the last window.
#[derive(Default, Debug)]
pub struct SlidingWindow {
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn try_acquire(&mut self, limit: Limit, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) < limit.window {
                break;
            }
            self.hits.pop_front();
        }
        if self.hits.len() >= limit.max_requests {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::ratelimit::*;

    const LIMIT: Limit = Limit {
        max_requests: 3,
        window: Duration::from_secs(60),
    };

    #[test]
    fn test_fourth_request_is_refused() {
        let now = Instant::now();
        let mut window = SlidingWindow::default();
        assert!(window.try_acquire(LIMIT, now));
        assert!(window.try_acquire(LIMIT, now));
        assert!(window.try_acquire(LIMIT, now));
        assert!(!window.try_acquire(LIMIT, now));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let start = Instant::now();
        let mut window = SlidingWindow::default();
        for _ in 0..3 {
            assert!(window.try_acquire(LIMIT, start));
        }
        assert!(!window.try_acquire(LIMIT, start + Duration::from_secs(59)));
        assert!(window.try_acquire(LIMIT, start + Duration::from_secs(60)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_zero_limit_refuses_everything() {
        let mut window = SlidingWindow::default();
        let limit = Limit {
            max_requests: 0,
            ..LIMIT
        };
        assert!(!window.try_acquire(limit, Instant::now()));
        assert!(window.is_empty());
    }

    #[test]
    fn test_limits_per_action() {
        let limits = RateLimits::default();
        assert_eq!(limits.for_action(Action::ConfigSet).max_requests, 10);
        assert_eq!(limits.for_action(Action::HostCheck).max_requests, 30);
        assert_eq!(limits.for_action(Action::HostWakeup).max_requests, 5);
        assert_eq!(
            limits.for_action(Action::HostWakeup).window,
            Duration::from_secs(60)
        );
    }
}
