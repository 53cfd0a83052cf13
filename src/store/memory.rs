//! In-process coordination store
//!
//! Single-process fallback used when no STORE_URL is configured (local
//! development) and by tests. Implements the same atomic contract as the
//! Redis store, but coordination obviously does not extend past this
//! process.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Store, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
    Set(HashSet<String>),
    Scores(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// Process-local store with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned guard still holds a structurally sound map.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn deadline(ttl_seconds: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_secs(ttl_seconds))
    }
}

fn take_if_live(map: &mut HashMap<String, Entry>, key: &str) -> Option<Entry> {
    match map.remove(key) {
        Some(entry) if entry.live() => Some(entry),
        _ => None,
    }
}

fn read_live<'a>(map: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    map.get(key).filter(|entry| entry.live())
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.lock();
        match read_live(&map, key).map(|e| &e.value) {
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(Value::Counter(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(StoreError::Corrupt(format!(
                "key {} holds a non-string value",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut map = self.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, StoreError> {
        let mut map = self.lock();
        if read_live(&map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.lock();
        match take_if_live(&mut map, key).map(|e| e.value) {
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(Value::Counter(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(StoreError::Corrupt(format!(
                "key {} holds a non-string value",
                key
            ))),
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn incr_by_ex(
        &self,
        key: &str,
        delta: i64,
        ttl_seconds: u64,
    ) -> Result<i64, StoreError> {
        let mut map = self.lock();
        let current = match take_if_live(&mut map, key) {
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => n,
            Some(Entry {
                value: Value::Text(s),
                ..
            }) => s
                .parse::<i64>()
                .map_err(|_| StoreError::Corrupt(format!("key {} is not a counter", key)))?,
            Some(_) => {
                return Err(StoreError::Corrupt(format!("key {} is not a counter", key)))
            }
            None => 0,
        };
        let next = current + delta;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(next),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(next)
    }

    async fn incr_many_ex(
        &self,
        counters: &[(String, i64)],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        for (key, delta) in counters {
            self.incr_by_ex(key, *delta, ttl_seconds).await?;
        }
        Ok(())
    }

    async fn zincr_ex(
        &self,
        key: &str,
        member: &str,
        delta: i64,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let mut map = self.lock();
        let mut scores = match take_if_live(&mut map, key) {
            Some(Entry {
                value: Value::Scores(scores),
                ..
            }) => scores,
            Some(_) => {
                return Err(StoreError::Corrupt(format!(
                    "key {} is not a sorted set",
                    key
                )))
            }
            None => HashMap::new(),
        };
        *scores.entry(member.to_string()).or_insert(0) += delta;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Scores(scores),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn ztop(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>, StoreError> {
        let map = self.lock();
        let Some(entry) = read_live(&map, key) else {
            return Ok(Vec::new());
        };
        let Value::Scores(scores) = &entry.value else {
            return Err(StoreError::Corrupt(format!(
                "key {} is not a sorted set",
                key
            )));
        };
        let mut ranked: Vec<(String, i64)> =
            scores.iter().map(|(m, s)| (m.clone(), *s)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(count);
        Ok(ranked)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let map = self.lock();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match read_live(&map, key).map(|e| &e.value) {
                Some(Value::Text(s)) => Some(s.clone()),
                Some(Value::Counter(n)) => Some(n.to_string()),
                _ => None,
            };
            out.push(value);
        }
        Ok(out)
    }

    async fn sadd_ex(&self, key: &str, member: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut map = self.lock();
        let mut members = match take_if_live(&mut map, key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => members,
            Some(_) => return Err(StoreError::Corrupt(format!("key {} is not a set", key))),
            None => HashSet::new(),
        };
        members.insert(member.to_string());
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Set(members),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut map = self.lock();
        if let Some(Entry {
            value: Value::Set(members),
            ..
        }) = map.get_mut(key)
        {
            members.remove(member);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_increments_atomically_across_tasks() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr_by_ex("counter", 1, 60).await.unwrap()
            }));
        }

        let mut observed = Vec::new();
        for handle in handles {
            observed.push(handle.await.unwrap());
        }
        observed.sort_unstable();

        // Every increment observed a distinct value
        assert_eq!(observed, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_set_nx_is_write_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("marker", "1", 60).await.unwrap());
        assert!(!store.set_nx_ex("marker", "1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_del_consumes_once() {
        let store = MemoryStore::new();
        store.set_ex("nonce", "/after-login", 60).await.unwrap();

        assert_eq!(
            store.get_del("nonce").await.unwrap(),
            Some("/after-login".to_string())
        );
        assert_eq!(store.get_del("nonce").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let store = MemoryStore::new();
        store.set_ex("gone", "x", 0).await.unwrap();
        assert_eq!(store.get("gone").await.unwrap(), None);

        // An expired counter restarts from zero
        store.incr_by_ex("count", 5, 0).await.unwrap();
        assert_eq!(store.incr_by_ex("count", 1, 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ztop_ranks_descending() {
        let store = MemoryStore::new();
        store.zincr_ex("board", "alice", 3, 60).await.unwrap();
        store.zincr_ex("board", "bob", 7, 60).await.unwrap();
        store.zincr_ex("board", "carol", 5, 60).await.unwrap();

        let top = store.ztop("board", 2).await.unwrap();
        assert_eq!(top, vec![("bob".to_string(), 7), ("carol".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_mget_tolerates_missing_keys() {
        let store = MemoryStore::new();
        store.set_ex("a", "1", 60).await.unwrap();

        let values = store
            .mget(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None]);
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        store.sadd_ex("tokens", "t1", 60).await.unwrap();
        store.sadd_ex("tokens", "t2", 60).await.unwrap();
        store.srem("tokens", "t1").await.unwrap();

        // Remaining member survives, removed one is gone
        let map = store.lock();
        let Value::Set(members) = &map.get("tokens").unwrap().value else {
            panic!("expected set");
        };
        assert!(members.contains("t2"));
        assert!(!members.contains("t1"));
    }
}
