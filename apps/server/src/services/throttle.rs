//! Per-client throttle for account registration.
//!
//! Sliding window: every accepted attempt records a timestamp, and a client
//! is rejected while `limit` timestamps fall inside the last `window`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use health_store::Clock;
use tokio::sync::Mutex;

/// Sliding-window registration throttle keyed by client.
pub struct RegistrationThrottle {
    limit: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RegistrationThrottle {
    /// Creates a throttle allowing `limit` attempts per `window_secs`.
    pub fn new(limit: u32, window_secs: u64, clock: Arc<dyn Clock>) -> Self {
        let window_secs = i64::try_from(window_secs).unwrap_or(i64::MAX / 1000);
        Self {
            limit: limit as usize,
            window: Duration::seconds(window_secs),
            clock,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt by `client`.
    ///
    /// Returns the number of seconds until the next attempt would be allowed
    /// when the client is over its limit. Rejected attempts are not recorded.
    pub async fn check(&self, client: &str) -> Result<(), u64> {
        let now = self.clock.now();
        let cutoff = now - self.window;

        let mut attempts = self.attempts.lock().await;
        // Drop clients with no attempts left in the window
        attempts.retain(|_, stamps| stamps.back().is_some_and(|last| *last > cutoff));

        let stamps = attempts.entry(client.to_string()).or_default();
        while stamps.front().is_some_and(|first| *first <= cutoff) {
            stamps.pop_front();
        }

        if stamps.len() >= self.limit {
            let oldest = stamps.front().copied().unwrap_or(now);
            let wait = (oldest + self.window - now).num_seconds().max(1);
            tracing::debug!(client = %client, wait, "Registration throttled");
            return Err(wait as u64);
        }

        stamps.push_back(now);
        Ok(())
    }
}

impl std::fmt::Debug for RegistrationThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationThrottle")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
