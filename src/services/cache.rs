use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// How long a cached model response stays usable.
const CACHE_TTL_HOURS: i64 = 24;

struct CacheEntry {
    response: String,
    stored_at: DateTime<Utc>,
}

/// In-memory prompt-response cache keyed by SHA-256 of prompt + context.
///
/// Expiry is checked on every read; an entry past the TTL is a miss even if it
/// is still physically present. Not persisted across restarts and never
/// evicted by size, which caps usefulness on long-lived processes with many
/// distinct documents.
pub struct PromptCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for PromptCache {
    fn default() -> Self {
        PromptCache {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::hours(CACHE_TTL_HOURS),
        }
    }
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key derivation is order-sensitive: prompt first, then context.
    fn key(prompt: &str, context: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(context.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn lookup(&self, prompt: &str, context: &str) -> Option<String> {
        let key = Self::key(prompt, context);
        // A poisoned lock degrades to a miss; the cache is an optimization.
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&key)?;
        if Utc::now() - entry.stored_at >= self.ttl {
            return None;
        }
        Some(entry.response.clone())
    }

    pub fn store(&self, prompt: &str, context: &str, response: &str) {
        let key = Self::key(prompt, context);
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.insert(
            key,
            CacheEntry {
                response: response.to_string(),
                stored_at: Utc::now(),
            },
        );
    }

    #[cfg(test)]
    fn backdate(&self, prompt: &str, context: &str, age: Duration) {
        let key = Self::key(prompt, context);
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&key) {
            entry.stored_at = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_hits() {
        let cache = PromptCache::new();
        cache.store("prompt", "context", "response");
        assert_eq!(
            cache.lookup("prompt", "context"),
            Some("response".to_string())
        );
    }

    #[test]
    fn entry_expires_after_ttl_without_eviction() {
        let cache = PromptCache::new();
        cache.store("prompt", "context", "response");

        cache.backdate("prompt", "context", Duration::hours(23));
        assert!(cache.lookup("prompt", "context").is_some());

        cache.backdate("prompt", "context", Duration::hours(24));
        assert_eq!(cache.lookup("prompt", "context"), None);
    }

    #[test]
    fn key_is_order_sensitive() {
        let cache = PromptCache::new();
        cache.store("abc", "def", "response");
        assert_eq!(cache.lookup("def", "abc"), None);
        assert_eq!(cache.lookup("abcdef", ""), Some("response".to_string()));
    }
}
