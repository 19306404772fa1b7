use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use spilka_types::settings::MessagingSettings;

use crate::error::MessagingError;
use crate::permissions::{self, RATE_WINDOW_SECS};

/// Per-sender sliding window of recent send instants.
///
/// Enforcement is approximate on purpose: the contract is "no more than
/// N+ε messages in a rolling minute", not an exact ledger.
pub struct RateLimiter {
    windows: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a send attempt. On rejection nothing is recorded.
    pub fn check(&self, sender_id: Uuid, settings: &MessagingSettings) -> Result<(), MessagingError> {
        self.check_at(sender_id, settings, Instant::now())
    }

    /// Clock-injected variant so the window rollover is testable.
    pub fn check_at(
        &self,
        sender_id: Uuid,
        settings: &MessagingSettings,
        now: Instant,
    ) -> Result<(), MessagingError> {
        let window = Duration::from_secs(RATE_WINDOW_SECS);
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let recent = windows.entry(sender_id).or_default();

        while recent
            .front()
            .is_some_and(|first| now.duration_since(*first) >= window)
        {
            recent.pop_front();
        }

        let decision = permissions::check_message_rate_limit(recent.len() as u32, settings);
        if !decision.allowed {
            let retry_after_secs = recent
                .front()
                .map(|first| window.saturating_sub(now.duration_since(*first)).as_secs())
                .unwrap_or(RATE_WINDOW_SECS);
            return Err(MessagingError::RateLimited { retry_after_secs });
        }

        recent.push_back(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
