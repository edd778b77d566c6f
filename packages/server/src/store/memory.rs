//! In-process implementation of [`SharedStore`].
//!
//! Keys expire lazily on access against `tokio::time::Instant`, so
//! tests driving the paused clock see real TTL behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::SharedStore;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    keys: HashMap<String, (String, Instant)>,
    sets: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .keys
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        match inner.keys.remove(key) {
            Some((value, expires_at)) if expires_at > Instant::now() => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        match inner.keys.get(key) {
            Some((_, expires_at)) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                inner.keys.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if let Some(members) = inner.sets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                inner.sets.remove(set);
            }
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get_del("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_del_is_consume_once() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("ticket", "42", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get_del("ticket").await.unwrap(), Some("42".into()));
        assert_eq!(store.get_del("ticket").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sets_add_remove_and_list() {
        let store = MemoryStore::new();
        store.set_add("online", "1").await.unwrap();
        store.set_add("online", "2").await.unwrap();
        store.set_add("online", "2").await.unwrap();

        let mut members = store.set_members("online").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["1", "2"]);

        store.set_remove("online", "1").await.unwrap();
        assert_eq!(store.set_members("online").await.unwrap(), vec!["2"]);
    }
}
