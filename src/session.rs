use crate::auth;
use crate::ratelimit::{Action, RateLimits, SlidingWindow};
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const SESSION_COOKIE: &str = "WOLSID";
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const MAX_SESSIONS: usize = 10_000;
// Idle sessions are swept at most this often.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionState {
    csrf_token: String,
    windows: HashMap<Action, SlidingWindow>,
    last_seen: Instant,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            csrf_token: auth::generate_token(),
            windows: HashMap::new(),
            last_seen: now,
        }
    }
}

#[derive(Default)]
struct Table {
    sessions: HashMap<String, SessionState>,
    last_sweep: Option<Instant>,
}

impl Table {
    fn sweep(&mut self, now: Instant) {
        self.sessions
            .retain(|_, s| now.saturating_duration_since(s.last_seen) < SESSION_TIMEOUT);
        self.last_sweep = Some(now);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, s)| s.last_seen)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!("session table full, evicting least recently seen session");
            self.sessions.remove(&id);
        }
    }
}

/// Per-session CSRF tokens and request counters, shared by every worker
/// thread. A session is created on its first request and dropped after
/// `SESSION_TIMEOUT` without one. At most `max_sessions` are held; a new
/// session beyond that evicts the least recently seen one.
pub struct Sessions {
    limits: RateLimits,
    max_sessions: usize,
    inner: Mutex<Table>,
}

impl Sessions {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_capacity(limits, MAX_SESSIONS)
    }

    pub fn with_capacity(limits: RateLimits, max_sessions: usize) -> Self {
        Self {
            limits,
            max_sessions: max_sessions.max(1),
            inner: Mutex::new(Table::default()),
        }
    }

    fn with_session<R>(&self, id: &str, now: Instant, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut table = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let sweep_due = table
            .last_sweep
            .map_or(true, |last| now.saturating_duration_since(last) >= SWEEP_INTERVAL);
        if sweep_due {
            table.sweep(now);
        }
        if let Some(state) = table.sessions.get(id) {
            // Expired but not yet swept.
            if now.saturating_duration_since(state.last_seen) >= SESSION_TIMEOUT {
                table.sessions.remove(id);
            }
        }
        if !table.sessions.contains_key(id) {
            while table.sessions.len() >= self.max_sessions {
                table.evict_oldest();
            }
        }
        let state = table
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionState::new(now));
        state.last_seen = now;
        f(state)
    }

    pub fn csrf_token(&self, id: &str) -> String {
        self.with_session(id, Instant::now(), |s| s.csrf_token.clone())
    }

    pub fn validate_csrf(&self, id: &str, token: &str) -> bool {
        self.with_session(id, Instant::now(), |s| {
            auth::secrets_match(&s.csrf_token, token)
        })
    }

    pub fn rotate_csrf(&self, id: &str) -> String {
        self.with_session(id, Instant::now(), |s| {
            s.csrf_token = auth::generate_token();
            s.csrf_token.clone()
        })
    }

    pub fn check_rate_limit(&self, id: &str, action: Action) -> bool {
        self.check_rate_limit_at(id, action, Instant::now())
    }

    pub fn check_rate_limit_at(&self, id: &str, action: Action, now: Instant) -> bool {
        let limit = self.limits.for_action(action);
        self.with_session(id, now, |s| {
            s.windows.entry(action).or_default().try_acquire(limit, now)
        })
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
