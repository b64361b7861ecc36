//! Namespaced client handles
//!
//! A [`FeatureHandle`] binds one live connection to an immutable key prefix.
//! Every operation applies the prefix transparently, so independent features
//! sharing a physical connection never see each other's keys. The handle does
//! not own the connection's lifecycle; the manager closes it at shutdown.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::StoreError;
use crate::manager::ManagedConnection;
use crate::transport::KvClient;

/// A namespaced view over one shared store connection
#[derive(Clone)]
pub struct FeatureHandle {
    client: Arc<dyn KvClient>,
    prefix: String,
    feature: Option<String>,
}

impl FeatureHandle {
    /// Bind a connection to a key namespace.
    ///
    /// An empty prefix disables namespacing; a trailing `:` on the prefix is
    /// normalized away since the handle inserts the separator itself.
    #[must_use]
    pub fn new(
        connection: &ManagedConnection,
        prefix: impl Into<String>,
        feature: Option<String>,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            client: connection.client(),
            prefix: prefix.trim_end_matches(':').to_string(),
            feature,
        }
    }

    fn scoped(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    fn unscoped(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            key.strip_prefix(&format!("{}:", self.prefix))
                .unwrap_or(key)
                .to_string()
        }
    }

    /// Read a string value
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.client.get(&self.scoped(key)).await?)
    }

    /// Write a string value with no expiry
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.client.set(&self.scoped(key), value).await?)
    }

    /// Write a string value that expires after `ttl_seconds`
    pub async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        Ok(self
            .client
            .set_ex(&self.scoped(key), value, ttl_seconds)
            .await?)
    }

    /// Delete keys in one batch; returns the number actually removed
    pub async fn delete(&self, keys: &[&str]) -> Result<u64, StoreError> {
        let scoped: Vec<String> = keys.iter().map(|k| self.scoped(k)).collect();
        Ok(self.client.del(&scoped).await?)
    }

    /// Whether a key exists
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.client.exists(&self.scoped(key)).await?)
    }

    /// Set a key's expiry; returns false when the key does not exist
    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool, StoreError> {
        Ok(self.client.expire(&self.scoped(key), ttl_seconds).await?)
    }

    /// Remaining time-to-live in seconds (-2 missing key, -1 no expiry)
    pub async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.client.ttl(&self.scoped(key)).await?)
    }

    /// List keys in this namespace matching a glob pattern.
    ///
    /// The pattern is namespace-relative and results come back with the
    /// prefix stripped.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matches = self.client.keys(&self.scoped(pattern)).await?;
        Ok(matches.iter().map(|k| self.unscoped(k)).collect())
    }

    /// Read one hash field
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.client.hget(&self.scoped(key), field).await?)
    }

    /// Write one hash field
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.client.hset(&self.scoped(key), field, value).await?)
    }

    /// Read all fields of a hash
    pub async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.client.hget_all(&self.scoped(key)).await?)
    }

    /// Push values onto the head of a list; returns the new length
    pub async fn lpush(&self, key: &str, values: &[&str]) -> Result<u64, StoreError> {
        let owned: Vec<String> = values.iter().map(ToString::to_string).collect();
        Ok(self.client.lpush(&self.scoped(key), &owned).await?)
    }

    /// Push values onto the tail of a list; returns the new length
    pub async fn rpush(&self, key: &str, values: &[&str]) -> Result<u64, StoreError> {
        let owned: Vec<String> = values.iter().map(ToString::to_string).collect();
        Ok(self.client.rpush(&self.scoped(key), &owned).await?)
    }

    /// Pop one value from the head of a list
    pub async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.client.lpop(&self.scoped(key)).await?)
    }

    /// Pop one value from the tail of a list
    pub async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.client.rpop(&self.scoped(key)).await?)
    }

    /// Trim a list to the inclusive range `[start, stop]`
    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        Ok(self.client.ltrim(&self.scoped(key), start, stop).await?)
    }

    /// Serialize a structured value as JSON, optionally with an expiry
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;

        match ttl_seconds {
            Some(ttl) => self.set_ex(key, &payload, ttl).await,
            None => self.set(key, &payload).await,
        }
    }

    /// Read a JSON value.
    ///
    /// A missing key and an unparseable payload both yield `Ok(None)`; a
    /// stale or foreign payload is treated as a cache miss, not an error.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(payload) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                debug!(
                    key,
                    feature = self.feature.as_deref().unwrap_or("-"),
                    %error,
                    "cached payload did not parse, treating as miss"
                );
                Ok(None)
            }
        }
    }

    /// Cache-aside helper: return the cached value, or produce one with
    /// `factory`, store it with the given expiry, and return it.
    ///
    /// Concurrent misses for the same key may each invoke `factory`; callers
    /// that need single-flight semantics must provide their own.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: Option<u64>,
        factory: F,
    ) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(cached) = self.get_json(key).await? {
            return Ok(cached);
        }

        let fresh = factory().await.map_err(StoreError::Factory)?;
        self.set_json(key, &fresh, ttl_seconds).await?;
        Ok(fresh)
    }

    /// Delete every key in this namespace matching a glob pattern; returns
    /// the number deleted, 0 when nothing matches.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let matches = self.client.keys(&self.scoped(pattern)).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        Ok(self.client.del(&matches).await?)
    }

    /// Delete every key in this namespace
    pub async fn flush_namespace(&self) -> Result<u64, StoreError> {
        self.delete_pattern("*").await
    }
}

impl std::fmt::Debug for FeatureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureHandle")
            .field("prefix", &self.prefix)
            .field("feature", &self.feature)
            .finish_non_exhaustive()
    }
}
