//! Mock attempt counter for testing.

use super::lock;
use crate::error::Result;
use crate::providers::{AttemptCount, AttemptCounter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory fixed-window counter.
///
/// Increment and window start happen under one lock. Expired windows are
/// discarded lazily on access to that key.
///
/// **Production**: Use `RedisAttemptCounter` which has `TTL`-based cleanup.
#[derive(Debug, Clone, Default)]
pub struct MockAttemptCounter {
    /// key -> (count, window end)
    counters: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
}

impl MockAttemptCounter {
    /// Create a new mock counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptCounter for MockAttemptCounter {
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptCount> {
        let mut counters = lock(&self.counters)?;
        let now = Instant::now();

        let slot = counters.entry(key.to_string()).or_insert((0, now + window));
        if slot.1 <= now {
            *slot = (0, now + window);
        }
        slot.0 += 1;

        Ok(AttemptCount {
            count: slot.0,
            resets_in: Some(slot.1.saturating_duration_since(now)),
        })
    }

    async fn current(&self, key: &str) -> Result<u64> {
        let counters = lock(&self.counters)?;
        Ok(counters
            .get(key)
            .filter(|(_, ends)| *ends > Instant::now())
            .map_or(0, |(count, _)| *count))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        lock(&self.counters)?.remove(key);
        Ok(())
    }
}
