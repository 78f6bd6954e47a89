use super::{decode, encode, CacheBackend, CacheError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Process-local credential store, bounded by the size of the encoded entries.
#[derive(Clone)]
pub struct InMemoryCache {
    entries: MokaCache<String, String>,
}

impl InMemoryCache {
    pub fn new(ttl_secs: u64, capacity_mib: usize) -> Result<Self, String> {
        let capacity_bytes = u64::try_from(capacity_mib)
            .ok()
            .and_then(|mib| mib.checked_mul(MIB))
            .ok_or_else(|| format!("Cache capacity of {capacity_mib} MiB is too large"))?;

        let entries = MokaCache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .weigher(|key: &String, value: &String| {
                u32::try_from(key.len() + value.len()).unwrap_or(u32::MAX)
            })
            .max_capacity(capacity_bytes)
            .build();

        Ok(Self { entries })
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let encoded = encode(value)?;
        self.entries.insert(key.to_owned(), encoded).await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        decode(self.entries.get(key).await)
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::StoredToken;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryCache::new(1, 16).unwrap();
        let token = StoredToken::new("alice", "at-1");

        cache.set("alice", &token).await.unwrap();
        assert_eq!(cache.get::<StoredToken>("alice").await.unwrap(), Some(token));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get::<StoredToken>("alice").await.unwrap().is_none());
        assert!(!cache.contains("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_value_of_another_type_fails_to_decode() {
        let cache = InMemoryCache::new(60, 16).unwrap();
        cache.set("alice", &42).await.unwrap();

        assert!(matches!(
            cache.get::<StoredToken>("alice").await,
            Err(CacheError::Deserialization(_))
        ));
    }

    #[test]
    fn test_capacity_overflow_is_rejected() {
        assert!(InMemoryCache::new(60, usize::MAX).is_err());
    }
}
