//! Process-wide caches for the gateway.
//!
//! Three caches share this module's primitives: the query/response cache,
//! the OIDC discovery cache, and the UserInfo cache. All three need the
//! same "single concurrent build per key" guarantee — when several requests
//! miss the same key at once, the factory for that key runs exactly once
//! and every waiter observes the same value.
//!
//! Response-shaped values (database results, proxied HTTP responses) and
//! OIDC signing keys do not round-trip through a generic serializer, so
//! this module also defines the narrow shadow records ([`DbCacheEntry`],
//! [`ProxyCacheEntry`], [`OidcDiscoveryEntry`], [`UserInfoCacheEntry`]) that
//! stand in for them at the cache boundary.

use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

/// A single cache slot: either empty-and-building, or resolved with a TTL.
struct Slot<V> {
    once: Arc<OnceCell<V>>,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl<V> Slot<V> {
    fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// A singleflight cache: concurrent misses for the same key share one
/// in-flight build.
pub struct SingleflightCache<K, V> {
    slots: DashMap<K, Slot<V>>,
    /// Guards slot creation so two callers racing on a brand-new key don't
    /// each create their own `OnceCell`.
    creation_lock: Mutex<()>,
}

impl<K, V> Default for SingleflightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleflightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self { slots: DashMap::new(), creation_lock: Mutex::new(()) }
    }

    /// Return the cached value for `key`, or produce and cache it via
    /// `build`. Guarantees at most one concurrent execution of `build` per
    /// key: when several callers race on the same missing key, only the
    /// first runs `build`, and the rest await its result.
    pub async fn get_or_build<F, Fut>(&self, key: K, ttl: Option<Duration>, build: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(slot) = self.slots.get(&key) {
            if !slot.is_expired() {
                let once = slot.once.clone();
                drop(slot);
                // `OnceCell::get_or_init` only ever runs the closure passed by
                // whichever caller first reaches it; a caller that finds the
                // cell already initializing awaits that in-flight build and
                // never invokes its own closure at all. Passing `build` here
                // (rather than a closure that must never run) means a racing
                // creator that inserted the slot but hasn't yet called
                // `get_or_init` itself no longer risks a second caller
                // tripping a trap closure.
                return once.get_or_init(build).await.clone();
            }
        }

        // Either missing or expired: (re)install a fresh slot. The creation
        // lock serializes slot *installation*, not the (possibly slow)
        // build itself, which runs after the lock is released.
        let once = {
            let _guard = self.creation_lock.lock().await;
            match self.slots.get(&key) {
                Some(slot) if !slot.is_expired() => slot.once.clone(),
                _ => {
                    let once = Arc::new(OnceCell::new());
                    self.slots.insert(
                        key.clone(),
                        Slot { once: once.clone(), inserted_at: Instant::now(), ttl },
                    );
                    once
                }
            }
        };

        once.get_or_init(build).await.clone()
    }

    /// Insert a value directly, bypassing the build path (used when a value
    /// is computed outside the singleflight closure, e.g. during tests).
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let once = Arc::new(OnceCell::new());
        let _ = once.set(value);
        self.slots.insert(key, Slot { once, inserted_at: Instant::now(), ttl });
    }

    /// Look up a key without triggering a build.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key)?;
        if slot.is_expired() {
            return None;
        }
        slot.once.get().cloned()
    }

    /// Remove a key, forcing the next lookup to rebuild.
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Number of (possibly expired) slots currently held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache holds no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Shadow record for a cached database-query response. Framework response
/// abstractions are lowered to this record before serialization and
/// reconstituted from it on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCacheEntry {
    pub status_code: u16,
    pub data: serde_json::Value,
}

/// An ordered multi-map, preserving insertion order and allowing repeated
/// keys, used for header round-tripping in [`ProxyCacheEntry`].
pub type OrderedHeaders = Vec<(String, String)>;

/// Shadow record for a cached proxied HTTP response. Chunked-transfer and
/// content-length headers are excluded on both write and read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCacheEntry {
    pub status_code: u16,
    pub headers: OrderedHeaders,
    pub content_headers: OrderedHeaders,
    pub body: Vec<u8>,
}

const EXCLUDED_REPLAY_HEADERS: [&str; 2] = ["transfer-encoding", "content-length"];

/// Headers that never round-trip through cache entries (streamed bodies
/// carry their own framing).
pub fn is_excluded_from_cache_replay(header_name: &str) -> bool {
    EXCLUDED_REPLAY_HEADERS.contains(&header_name.to_ascii_lowercase().as_str())
}

/// Shadow record for a cached OIDC discovery document. Signing keys are
/// reconstituted from `raw_jwks_json` on read, never stored directly,
/// because opaque key objects do not round-trip through a generic
/// serializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscoveryEntry {
    pub issuer: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: Option<String>,
    pub raw_jwks_json: String,
}

/// Shadow record for a cached UserInfo response, keyed externally by a
/// base64 hash of the access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoCacheEntry {
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Derive the deterministic cache key described for routes: a 64-bit XXH3
/// hash of `(route_id, method, path, sorted invalidator pairs)`, rendered
/// as an unsigned decimal string. Invalidator values longer than
/// `max_value_len` are omitted entirely (not truncated), matching the
/// per-value max-length rule.
pub fn derive_cache_key(
    route_id: &str,
    method: &str,
    path: &str,
    invalidators: &BTreeMap<String, String>,
    max_value_len: usize,
) -> String {
    let mut buf = String::with_capacity(128);
    buf.push_str(route_id);
    buf.push('\u{0}');
    buf.push_str(method);
    buf.push('\u{0}');
    buf.push_str(path);
    for (name, value) in invalidators {
        if value.len() > max_value_len {
            continue;
        }
        buf.push('\u{0}');
        buf.push_str(name);
        buf.push('=');
        buf.push_str(value);
    }
    let hash = xxhash_rust::xxh3::xxh3_64(buf.as_bytes());
    hash.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn single_build_per_key_under_concurrency() {
        let cache: Arc<SingleflightCache<String, u32>> = Arc::new(SingleflightCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build("k".to_string(), None, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        42
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_rebuilds() {
        let cache: SingleflightCache<&str, u32> = SingleflightCache::new();
        let v1 = cache
            .get_or_build("k", Some(Duration::from_millis(10)), || async { 1 })
            .await;
        assert_eq!(v1, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let v2 = cache.get_or_build("k", None, || async { 2 }).await;
        assert_eq!(v2, 2);
    }

    #[test]
    fn cache_key_is_deterministic_and_order_independent_on_value_set() {
        let mut a = BTreeMap::new();
        a.insert("name".to_string(), "bob".to_string());
        a.insert("age".to_string(), "30".to_string());

        let mut b = BTreeMap::new();
        b.insert("age".to_string(), "30".to_string());
        b.insert("name".to_string(), "bob".to_string());

        let k1 = derive_cache_key("contacts", "GET", "/contacts", &a, 256);
        let k2 = derive_cache_key("contacts", "GET", "/contacts", &b, 256);
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_omits_oversized_invalidator_values() {
        let mut small = BTreeMap::new();
        small.insert("name".to_string(), "bob".to_string());

        let mut big = BTreeMap::new();
        big.insert("name".to_string(), "x".repeat(1000));

        let k_small = derive_cache_key("r", "GET", "/p", &small, 4);
        let k_empty = derive_cache_key("r", "GET", "/p", &BTreeMap::new(), 4);
        let k_big = derive_cache_key("r", "GET", "/p", &big, 4);
        assert_ne!(k_small, k_empty);
        assert_eq!(k_big, k_empty);
    }

    #[test]
    fn excluded_replay_headers_are_case_insensitive() {
        assert!(is_excluded_from_cache_replay("Content-Length"));
        assert!(is_excluded_from_cache_replay("transfer-encoding"));
        assert!(!is_excluded_from_cache_replay("content-type"));
    }
}
