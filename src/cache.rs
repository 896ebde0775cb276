//! # Result Cache
//!
//! `ResultCache` memoizes `CommandResult`s by a fingerprint of everything
//! that could change the outcome (spec §4.8): the rendered command line,
//! the backend it ran against (which already encodes mode and
//! remote-host-or-local), the working directory, the sorted environment,
//! and the calling uid. Bounded by capacity (LRU eviction) and by a TTL;
//! certain error kinds are never written (`MancerError::is_cache_poison`,
//! see `error.rs`).
//!
//! Fingerprinting reuses `sha2`, the hashing crate already pulled in by
//! the `web3infra-foundation-git-internal` example for its own
//! content-addressed object store — the same "hash the exact bytes that
//! determine identity" discipline, applied here to cache keys instead of
//! git object ids.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::result::CommandResult;

/// The calling process's uid, folded into the cache key (spec §4.8) so
/// two users on a shared host never see each other's cached output.
/// Always `0` on non-Unix targets, where `openssh`/signal handling are
/// unsupported anyway.
#[cfg(unix)]
pub fn current_uid() -> u32 {
    // SAFETY: getuid() takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
pub fn current_uid() -> u32 {
    0
}

/// Inputs that determine whether two executions are cache-equivalent
/// (spec §4.8).
#[derive(Debug, Clone)]
pub struct CacheKeyInput<'a> {
    /// The fully rendered, quoted command line.
    pub rendered_command: &'a str,
    /// `ExecutionContext::backend_key()` — local vs. a specific remote
    /// host, so the same command against two hosts never collides.
    pub backend_key: &'a str,
    /// Working directory the command ran in.
    pub cwd: &'a str,
    /// The execution's environment variables — sorted by key before
    /// hashing so iteration order never affects the fingerprint.
    pub env: &'a HashMap<String, String>,
    /// The calling process's uid.
    pub uid: u32,
    /// Rendered `input_data` parameter, if stdin was piped in.
    pub input_data: Option<&'a str>,
}

/// SHA-256 fingerprint of a `CacheKeyInput`, hex-encoded.
pub fn fingerprint(input: &CacheKeyInput<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.rendered_command.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.backend_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.cwd.as_bytes());
    hasher.update(b"\0");

    let mut env_pairs: Vec<(&String, &String)> = input.env.iter().collect();
    env_pairs.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in env_pairs {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"\0");

    hasher.update(input.uid.to_le_bytes());
    hasher.update(b"\0");

    if let Some(data) = input.input_data {
        hasher.update(data.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    result: CommandResult,
    inserted_at: Instant,
    last_used: Instant,
}

/// Bounded, TTL-expiring cache of `CommandResult`s keyed by fingerprint.
///
/// Not thread-safe by itself (matching the teacher's preference for
/// explicit `Arc<Mutex<_>>`/`Semaphore` wrapping at the call site rather
/// than baking synchronization into every data structure); `Orchestrator`
/// wraps this in a `Mutex` where shared access is needed.
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    ttl: Duration,
}

impl ResultCache {
    /// Construct a cache holding at most `capacity` entries, each valid
    /// for `ttl` after insertion.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Look up `key`, returning `None` on miss or if the entry has aged
    /// past its TTL (the stale entry is evicted as a side effect).
    pub fn get(&mut self, key: &str) -> Option<CommandResult> {
        let expired = self
            .entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed() >= self.ttl)
            .unwrap_or(false);

        if expired {
            self.entries.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.result.clone())
    }

    /// Insert `result` under `key`, evicting the least-recently-used entry
    /// first if the cache is already at capacity. A `capacity` of zero
    /// makes the cache a no-op, matching `Config::cache_disabled`.
    pub fn put(&mut self, key: String, result: CommandResult) {
        if self.capacity == 0 {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    fn evict_lru(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.entries.remove(&oldest_key);
        }
    }

    /// Number of entries currently retained (including not-yet-expired
    /// ones; expiry is checked lazily on `get`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn ok_result(marker: &str) -> CommandResult {
        CommandResult::new(true, marker.to_string(), String::new(), 0)
    }

    fn key(cmd: &str) -> CacheKeyInput<'static> {
        CacheKeyInput {
            rendered_command: Box::leak(cmd.to_string().into_boxed_str()),
            backend_key: "local",
            cwd: "/tmp",
            env: Box::leak(Box::new(HashMap::new())),
            uid: 1000,
            input_data: None,
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinguishes_inputs() {
        let a = fingerprint(&key("echo a"));
        let b = fingerprint(&key("echo a"));
        let c = fingerprint(&key("echo b"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_env_sort_order_is_irrelevant() {
        let mut env_a = HashMap::new();
        env_a.insert("A".to_string(), "1".to_string());
        env_a.insert("B".to_string(), "2".to_string());
        let mut env_b = HashMap::new();
        env_b.insert("B".to_string(), "2".to_string());
        env_b.insert("A".to_string(), "1".to_string());

        let mut input_a = key("echo a");
        input_a.env = &env_a;
        let mut input_b = key("echo a");
        input_b.env = &env_b;

        assert_eq!(fingerprint(&input_a), fingerprint(&input_b));
    }

    #[test]
    fn test_fingerprint_distinguishes_env_and_uid() {
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());

        let mut with_env = key("echo a");
        with_env.env = &env;
        let without_env = key("echo a");
        assert_ne!(fingerprint(&with_env), fingerprint(&without_env));

        let mut other_uid = key("echo a");
        other_uid.uid = 0;
        assert_ne!(fingerprint(&other_uid), fingerprint(&without_env));
    }

    #[test]
    fn test_put_get_round_trip() {
        let mut cache = ResultCache::new(10, Duration::from_secs(60));
        let fp = fingerprint(&key("echo a"));
        cache.put(fp.clone(), ok_result("out"));
        let hit = cache.get(&fp).unwrap();
        assert_eq!(hit.stdout, "out");
    }

    #[test]
    fn test_capacity_zero_is_noop() {
        let mut cache = ResultCache::new(0, Duration::from_secs(60));
        let fp = fingerprint(&key("echo a"));
        cache.put(fp.clone(), ok_result("out"));
        assert!(cache.get(&fp).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ResultCache::new(10, Duration::from_millis(10));
        let fp = fingerprint(&key("echo a"));
        cache.put(fp.clone(), ok_result("out"));
        sleep(Duration::from_millis(25));
        assert!(cache.get(&fp).is_none());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let mut cache = ResultCache::new(2, Duration::from_secs(60));
        let fp_a = fingerprint(&key("a"));
        let fp_b = fingerprint(&key("b"));
        let fp_c = fingerprint(&key("c"));

        cache.put(fp_a.clone(), ok_result("a"));
        cache.put(fp_b.clone(), ok_result("b"));
        // touch a so it's the most-recently-used, leaving b as the LRU victim
        cache.get(&fp_a);
        cache.put(fp_c.clone(), ok_result("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp_a).is_some());
        assert!(cache.get(&fp_b).is_none());
        assert!(cache.get(&fp_c).is_some());
    }
}
