//! Sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

/// Per-key sliding window counters.
///
/// Each key keeps the millisecond timestamps of its accepted calls that are
/// still inside the window, oldest first.
pub struct RateLimiter {
    window_ms: i64,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.max(0) as u64)
    }

    /// Record a call for `key` at `now_ms` if fewer than `limit` calls fall
    /// inside the window ending at `now_ms`.
    ///
    /// A rejected call is not recorded. Keys whose window has emptied are
    /// dropped.
    pub fn allow(&self, key: &str, limit: u32, now_ms: i64) -> bool {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let mut windows = self.windows.lock();

        let Some(stamps) = windows.get_mut(key) else {
            if limit == 0 {
                return false;
            }
            windows.retain(|_, stamps| stamps.back().is_some_and(|&t| t > cutoff));
            windows.insert(key.to_string(), VecDeque::from([now_ms]));
            return true;
        };

        while stamps.front().is_some_and(|&t| t <= cutoff) {
            stamps.pop_front();
        }
        if stamps.len() >= limit as usize {
            if stamps.is_empty() {
                windows.remove(key);
            }
            return false;
        }
        stamps.push_back(now_ms);
        true
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Calls currently counted against `key` at `now_ms`.
    pub fn count(&self, key: &str, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        self.windows
            .lock()
            .get(key)
            .map(|stamps| stamps.iter().filter(|&&t| t > cutoff).count())
            .unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}
