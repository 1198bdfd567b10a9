use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheClient, CacheError};

enum Value {
    Str(String),
    List(VecDeque<String>),
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache with the same expiry semantics as the Redis backend.
/// Can be switched off or slowed down to exercise the fallback paths.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    down: AtomicBool,
    delay: Option<Duration>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|m| m.get(key).is_some_and(|e| e.expires_at > Instant::now()))
            .unwrap_or(false)
    }

    async fn enter(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable);
        }
        let mut entries = self.entries.lock().map_err(|_| CacheError::Unavailable)?;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        Ok(entries)
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.enter().await?;
        Ok(match entries.get(key).map(|e| &e.value) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.enter().await?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.enter().await?;
        entries.remove(key);
        Ok(())
    }

    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.enter().await?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: Instant::now() + ttl,
        });
        if !matches!(entry.value, Value::List(_)) {
            entry.value = Value::List(VecDeque::new());
        }
        if let Value::List(list) = &mut entry.value {
            list.push_front(value.to_string());
            list.truncate(cap);
        }
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn replace_list(&self, key: &str, values: &[String], ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.enter().await?;
        if values.is_empty() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::List(values.iter().cloned().collect()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        let entries = self.enter().await?;
        Ok(match entries.get(key).map(|e| &e.value) {
            Some(Value::List(list)) => list.iter().take(limit).cloned().collect(),
            _ => Vec::new(),
        })
    }
}
