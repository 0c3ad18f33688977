//! Per-(series, address) request locks with automatic expiry.
//!
//! A lock is an entry in a keyed table with an expiry instant. Holders
//! release on drop; a holder that crashes simply lets the entry lapse, so a
//! wedged generation never blocks its key for longer than the TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One named lock namespace (image and speech generation each get their own).
pub struct LockTable {
    name: &'static str,
    entries: Mutex<HashMap<String, Instant>>,
}

impl LockTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The canonical key for a generation request.
    pub fn key(series: &str, address: &str) -> String {
        format!("{series}/{address}")
    }

    /// Acquire the key for `ttl`, returning an RAII guard, or None if a
    /// live holder exists. Never blocks.
    pub fn acquire(&self, key: &str, ttl: Duration) -> Option<LockGuard<'_>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock table poisoned");
        match entries.get(key) {
            Some(expiry) if *expiry > now => None,
            _ => {
                let expiry = now + ttl;
                entries.insert(key.to_string(), expiry);
                tracing::debug!(table = self.name, key, "lock acquired");
                Some(LockGuard {
                    table: self,
                    key: key.to_string(),
                    expiry,
                })
            }
        }
    }

    /// Drop the entry for `key`. Idempotent.
    pub fn release(&self, key: &str) {
        self.entries
            .lock()
            .expect("lock table poisoned")
            .remove(key);
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock table poisoned");
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        before - entries.len()
    }

    /// Whether `key` currently has a live holder.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("lock table poisoned")
            .get(key)
            .is_some_and(|expiry| *expiry > now)
    }
}

/// Releases its key on drop.
///
/// Release is conditioned on the guard's own expiry stamp, so a stale guard
/// outliving its TTL cannot release a successor's lock.
pub struct LockGuard<'a> {
    table: &'a LockTable,
    key: String,
    expiry: Instant,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock().expect("lock table poisoned");
        if entries.get(&self.key) == Some(&self.expiry) {
            entries.remove(&self.key);
            tracing::debug!(table = self.table.name, key = %self.key, "lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_acquire_excludes_second_holder() {
        let table = LockTable::new("test");
        let key = LockTable::key("wild", "0xabc");
        let guard = table.acquire(&key, TTL);
        assert!(guard.is_some());
        assert!(table.acquire(&key, TTL).is_none());
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let table = LockTable::new("test");
        let a = table.acquire(&LockTable::key("wild", "0xabc"), TTL);
        let b = table.acquire(&LockTable::key("wild", "0xdef"), TTL);
        let c = table.acquire(&LockTable::key("calm", "0xabc"), TTL);
        assert!(a.is_some() && b.is_some() && c.is_some());
    }

    #[test]
    fn test_guard_drop_releases() {
        let table = LockTable::new("test");
        let key = LockTable::key("wild", "0xabc");
        {
            let _guard = table.acquire(&key, TTL).unwrap();
            assert!(table.is_held(&key));
        }
        assert!(!table.is_held(&key));
        assert!(table.acquire(&key, TTL).is_some());
    }

    #[test]
    fn test_expired_entry_can_be_reacquired() {
        let table = LockTable::new("test");
        let key = LockTable::key("wild", "0xabc");
        let guard = table.acquire(&key, Duration::from_millis(5)).unwrap();
        // Keep the guard alive past its TTL: expiry alone must unlock.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!table.is_held(&key));
        let second = table.acquire(&key, TTL);
        assert!(second.is_some());
        // The stale guard must not release the successor's lock.
        drop(guard);
        assert!(table.is_held(&key));
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let table = LockTable::new("test");
        let _short = table.acquire("short", Duration::from_millis(5)).unwrap();
        let _long = table.acquire("long", TTL).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(table.sweep_expired(), 1);
        assert!(table.is_held("long"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let table = LockTable::new("test");
        table.release("never-held");
        table.release("never-held");
    }
}
