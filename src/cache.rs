use bytes::Bytes;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::dns_hdr::{decode_answers, Header, RCode};

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Upstream responses keyed by question name and type.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Bytes>;
    fn set(&self, key: &str, value: Bytes, ttl: Duration);
}

struct CacheEntry {
    value: Bytes,
    expires_at: Instant,
}

pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(max_entries.min(4096)),
            max_entries,
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);

        if self.entries.len() >= self.max_entries {
            // The iterator's shard guard must be gone before `remove` locks it.
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(key) = victim {
                self.entries.remove(&key);
            }
        }
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        match self.entries.entry(key.to_string()) {
            dashmap::Entry::Vacant(_) => None,
            dashmap::Entry::Occupied(e) => {
                if Instant::now() >= e.get().expires_at {
                    e.remove();
                    None
                } else {
                    Some(e.get().value.clone())
                }
            }
        }
    }

    fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.make_room();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// How long an upstream response may be reused: the smallest answer TTL.
/// Errors, empty answers and zero TTLs are not cached.
pub fn cacheable_ttl(response: &[u8]) -> Option<Duration> {
    let header = Header::from_bytes(response).ok()?;
    if header.flags.rcode != RCode::OK as u8 || header.ancount == 0 {
        return None;
    }

    let ttl = decode_answers(response, &header)
        .ok()?
        .iter()
        .map(|a| a.ttl)
        .min()?;

    (ttl > 0).then(|| Duration::from_secs(ttl as u64))
}
