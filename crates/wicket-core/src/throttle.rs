//! Bounded LRU caches guarding against double-posting and abuse.
//!
//! All three caches are capped so memory use stays flat regardless of
//! uptime; eviction just means the oldest entries stop being remembered,
//! which only ever makes the gate more permissive, never less safe.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Result, StoreError};

/// Per-identity (or per-IP, when no identity is available) post cooldown.
pub struct CooldownGate {
    cache: Mutex<LruCache<[u8; 8], u32>>,
}

impl CooldownGate {
    /// Creates a gate with the canonical capacity (256 keys).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        Self { cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())) }
    }

    /// Checks whether `key` may post at `now` given `cooldown_secs`, and
    /// records `now` as the last successful post time if so.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RateLimited`] if the cooldown window has not
    /// yet elapsed.
    pub fn check_and_record(&self, key: [u8; 8], now: u32, cooldown_secs: u32) -> Result<()> {
        let mut cache = self.cache.lock();
        if let Some(&last) = cache.get(&key) {
            if now.saturating_sub(last) < cooldown_secs {
                return Err(StoreError::RateLimited("cooldown has not elapsed".into()));
            }
        }
        cache.put(key, now);
        Ok(())
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot dedup of compose-form UUIDs, preventing accidental double
/// submission (e.g. a doubled form POST).
pub struct UuidDedup {
    cache: Mutex<LruCache<[u8; 16], ()>>,
}

impl UuidDedup {
    /// Creates a dedup set with the canonical capacity (1024 keys).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        Self { cache: Mutex::new(LruCache::new(NonZeroUsize::new(1024).unwrap())) }
    }

    /// Records `uuid` as seen.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RateLimited`] if `uuid` has already been
    /// submitted.
    pub fn check_and_record(&self, uuid: [u8; 16]) -> Result<()> {
        let mut cache = self.cache.lock();
        if cache.contains(&uuid) {
            return Err(StoreError::RateLimited("duplicate submission".into()));
        }
        cache.put(uuid, ());
        Ok(())
    }
}

impl Default for UuidDedup {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user failed-challenge counter driving automatic blocking.
pub struct BadUsers {
    cache: Mutex<LruCache<[u8; 8], u32>>,
    threshold: u32,
}

impl BadUsers {
    /// Creates a tracker with the canonical capacity (1024 keys) and the
    /// canonical auto-block threshold (more than 10 failures).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        Self { cache: Mutex::new(LruCache::new(NonZeroUsize::new(1024).unwrap())), threshold: 10 }
    }

    /// Records a failed challenge for `user`, returning `true` if the
    /// failure count has now crossed the auto-block threshold.
    pub fn record_failure(&self, user: [u8; 8]) -> bool {
        let mut cache = self.cache.lock();
        let count = cache.get(&user).copied().unwrap_or(0) + 1;
        cache.put(user, count);
        count > self.threshold
    }

    /// Clears the failure count for `user`, e.g. after a successful
    /// challenge response.
    pub fn clear(&self, user: &[u8; 8]) {
        self.cache.lock().pop(user);
    }
}

impl Default for BadUsers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_rejects_within_window() {
        let gate = CooldownGate::new();
        gate.check_and_record([1; 8], 100, 2).unwrap();
        assert!(gate.check_and_record([1; 8], 101, 2).is_err());
        assert!(gate.check_and_record([1; 8], 103, 2).is_ok());
    }

    #[test]
    fn uuid_dedup_rejects_repeat() {
        let dedup = UuidDedup::new();
        dedup.check_and_record([9; 16]).unwrap();
        assert!(dedup.check_and_record([9; 16]).is_err());
    }

    #[test]
    fn bad_users_blocks_after_threshold() {
        let tracker = BadUsers::new();
        let mut blocked = false;
        for _ in 0..11 {
            blocked = tracker.record_failure([2; 8]);
        }
        assert!(blocked);
    }
}
