//! Bootstrap and wiring: declared profiles in, feature handles out
//!
//! [`KvPool`] owns the registry and the connection manager and is the entry
//! point host applications wire into their startup and shutdown paths. It is
//! cheap to clone; every clone shares the same registry and connections.
//!
//! Profiles can be declared as plain values, async factories, or delegates —
//! all three resolve into [`crate::config::ConnectionProfile`] before the
//! registry ever sees them, and naming validation runs only once the whole
//! batch has resolved.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{ConnectionProfile, FeatureRequest};
use crate::error::PoolError;
use crate::handle::FeatureHandle;
use crate::manager::{ConnectionManager, PoolStats};
use crate::registry::ProfileRegistry;
use crate::transport::{Connector, RedisConnector};

/// Produces a connection profile once its own dependencies are ready
#[async_trait]
pub trait ProfileFactory: Send + Sync {
    /// Produce the profile
    async fn create_profile(&self) -> anyhow::Result<ConnectionProfile>;
}

type ProfileFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<ConnectionProfile>> + Send>;

/// One declared profile, by value or produced asynchronously
pub enum ProfileSource {
    /// A ready profile
    Value(ConnectionProfile),
    /// An async closure yielding a profile
    Factory(ProfileFn),
    /// An existing factory instance, shared with the host's wiring
    Delegate(Arc<dyn ProfileFactory>),
}

impl ProfileSource {
    /// Declare a ready profile
    #[must_use]
    pub fn value(profile: ConnectionProfile) -> Self {
        Self::Value(profile)
    }

    /// Declare a profile produced by an async closure
    pub fn factory<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<ConnectionProfile>> + Send + 'static,
    {
        Self::Factory(Box::new(move || factory().boxed()))
    }

    /// Declare a profile produced by a shared factory instance
    #[must_use]
    pub fn delegate(factory: Arc<dyn ProfileFactory>) -> Self {
        Self::Delegate(factory)
    }

    async fn resolve(self) -> Result<ConnectionProfile, PoolError> {
        let produced = match self {
            Self::Value(profile) => return Ok(profile),
            Self::Factory(factory) => factory().await,
            Self::Delegate(factory) => factory.create_profile().await,
        };

        produced.map_err(|e| PoolError::ProfileSource {
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for ProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(profile) => f.debug_tuple("Value").field(profile).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Delegate(_) => f.write_str("Delegate(..)"),
        }
    }
}

struct PoolInner {
    registry: Arc<ProfileRegistry>,
    manager: ConnectionManager,
}

/// The pooling layer's front door: profile registration, feature
/// acquisition, stats, shutdown.
#[derive(Clone)]
pub struct KvPool {
    inner: Arc<PoolInner>,
}

impl KvPool {
    /// Create an empty pool over the production connector
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(RedisConnector::new()))
    }

    /// Create an empty pool over a custom connector
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let registry = Arc::new(ProfileRegistry::new());
        let manager = ConnectionManager::new(Arc::clone(&registry), connector);
        Self {
            inner: Arc::new(PoolInner { registry, manager }),
        }
    }

    /// Start building a pool declaratively
    #[must_use]
    pub fn builder() -> KvPoolBuilder {
        KvPoolBuilder::default()
    }

    /// Register ready profiles; naming rules apply to the batch
    pub fn register_profiles(&self, profiles: Vec<ConnectionProfile>) -> Result<(), PoolError> {
        self.inner.registry.register(profiles)
    }

    /// Resolve async profile sources, then register the whole batch.
    ///
    /// Naming validation runs only after every source has produced its
    /// profile, so conflicts between async-declared profiles are caught the
    /// same way as between ready ones.
    pub async fn register_sources(&self, sources: Vec<ProfileSource>) -> Result<(), PoolError> {
        let mut profiles = Vec::with_capacity(sources.len());
        for source in sources {
            profiles.push(source.resolve().await?);
        }
        self.register_profiles(profiles)
    }

    /// Acquire a namespaced handle, opening the underlying connection now
    pub async fn acquire_feature(
        &self,
        request: FeatureRequest,
    ) -> Result<FeatureHandle, PoolError> {
        let effective = self.inner.manager.resolve_effective(&request)?;
        let connection = self.inner.manager.connection_for(&effective).await?;

        let prefix = effective.key_prefix.clone().unwrap_or_default();
        debug!(
            feature = request.feature.as_deref().unwrap_or("-"),
            profile = effective.effective_name(),
            prefix = %prefix,
            connection = connection.id(),
            "feature handle bound"
        );

        Ok(FeatureHandle::new(&connection, prefix, request.feature))
    }

    /// Acquire a handle whose connection is opened on first use
    #[must_use]
    pub fn acquire_feature_lazy(&self, request: FeatureRequest) -> LazyFeatureHandle {
        LazyFeatureHandle {
            pool: self.clone(),
            request,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Direct access to the connection manager
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Snapshot of connection and in-flight counts
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.manager.stats()
    }

    /// Close every owned connection; invoked once at orderly termination
    pub async fn shutdown(&self) {
        self.inner.manager.shutdown().await;
    }
}

impl Default for KvPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KvPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvPool")
            .field("profiles", &self.inner.registry.names())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Declarative pool construction
#[derive(Default)]
pub struct KvPoolBuilder {
    sources: Vec<ProfileSource>,
    connector: Option<Arc<dyn Connector>>,
}

impl KvPoolBuilder {
    /// Declare a ready profile
    #[must_use]
    pub fn profile(mut self, profile: ConnectionProfile) -> Self {
        self.sources.push(ProfileSource::value(profile));
        self
    }

    /// Declare several ready profiles
    #[must_use]
    pub fn profiles(mut self, profiles: impl IntoIterator<Item = ConnectionProfile>) -> Self {
        self.sources
            .extend(profiles.into_iter().map(ProfileSource::value));
        self
    }

    /// Declare an async profile source
    #[must_use]
    pub fn source(mut self, source: ProfileSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Use a custom connector instead of the production one
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Resolve every source and build the pool.
    ///
    /// No connections are opened here; they open lazily on first
    /// acquisition per sharing key.
    pub async fn build(self) -> Result<KvPool, PoolError> {
        let pool = match self.connector {
            Some(connector) => KvPool::with_connector(connector),
            None => KvPool::new(),
        };
        pool.register_sources(self.sources).await?;
        Ok(pool)
    }
}

impl std::fmt::Debug for KvPoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvPoolBuilder")
            .field("sources", &self.sources.len())
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

/// A feature handle whose connection opens on first use.
///
/// The first successful [`Self::handle`] call memoizes the bound handle;
/// later calls are pure cache hits. A failed first attempt is not memoized,
/// so callers may retry.
#[derive(Clone)]
pub struct LazyFeatureHandle {
    pool: KvPool,
    request: FeatureRequest,
    cell: Arc<OnceCell<FeatureHandle>>,
}

impl LazyFeatureHandle {
    /// The bound handle, opening the underlying connection if needed
    pub async fn handle(&self) -> Result<FeatureHandle, PoolError> {
        self.cell
            .get_or_try_init(|| self.pool.acquire_feature(self.request.clone()))
            .await
            .cloned()
    }
}

impl std::fmt::Debug for LazyFeatureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFeatureHandle")
            .field("request", &self.request)
            .field("bound", &self.cell.initialized())
            .finish()
    }
}
