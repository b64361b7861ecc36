//! Session cache built on a feature handle
//!
//! The canonical feature consumer: session tokens stored with an expiry
//! under the handle's namespace. Business code talks to this type and never
//! sees connections, prefixes or the registry.

use crate::error::StoreError;
use crate::handle::FeatureHandle;

/// Expiring session storage over a namespaced handle
#[derive(Debug, Clone)]
pub struct SessionStore {
    handle: FeatureHandle,
}

impl SessionStore {
    /// Bind the store to a feature handle
    #[must_use]
    pub fn new(handle: FeatureHandle) -> Self {
        Self { handle }
    }

    /// Store a session value that expires after `expiration_secs`
    pub async fn put(
        &self,
        key: &str,
        value: &str,
        expiration_secs: u64,
    ) -> Result<(), StoreError> {
        self.handle.set_ex(key, value, expiration_secs).await
    }

    /// Fetch a session value, `None` when missing or expired
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.handle.get(key).await
    }

    /// Remove a session value
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.handle.delete(&[key]).await?;
        Ok(())
    }
}
