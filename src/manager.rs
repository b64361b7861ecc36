//! Connection ownership: keying, deduplication, retry, shutdown
//!
//! The manager turns feature requests into live connections. Requests whose
//! effective configurations agree on every connection-relevant field share
//! one physical connection; concurrent first requests for the same key are
//! collapsed onto a single creation attempt via a shared future.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::{ConnectionProfile, FeatureRequest, IpFamily};
use crate::error::PoolError;
use crate::registry::ProfileRegistry;
use crate::retry::{RetryPolicy, RetryResult};
use crate::transport::{Connector, KvClient};

/// Canonical identity of a physical connection.
///
/// Derived from the effective configuration, restricted to the fields that
/// determine what the network connection looks like. Key prefix, retry
/// settings and feature names are deliberately absent: they change how a
/// connection is used, not which connection is needed. Credentials
/// participate as presence flags only, so secret values never enter map
/// identities or log output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharingKey {
    host: String,
    port: u16,
    db: i64,
    has_username: bool,
    has_password: bool,
    socket_path: Option<String>,
    ip_family: Option<IpFamily>,
    connect_timeout_ms: u64,
    lazy_connect: bool,
}

impl SharingKey {
    /// Derive the sharing key from an effective configuration
    #[must_use]
    pub fn of(profile: &ConnectionProfile) -> Self {
        Self {
            host: profile.host.clone(),
            port: profile.port,
            db: profile.db,
            has_username: profile.username.is_some(),
            has_password: profile.password.is_some(),
            socket_path: profile.socket_path.clone(),
            ip_family: profile.ip_family,
            connect_timeout_ms: profile.connect_timeout_ms,
            lazy_connect: profile.lazy_connect,
        }
    }

    /// Stable hex fingerprint for log lines
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "host={}&port={}&db={}&user={}&pass={}&socket={}&family={:?}&timeout={}&lazy={}",
            self.host,
            self.port,
            self.db,
            self.has_username,
            self.has_password,
            self.socket_path.as_deref().unwrap_or(""),
            self.ip_family,
            self.connect_timeout_ms,
            self.lazy_connect,
        );
        format!("{:016x}", xxh3_64(canonical.as_bytes()))
    }
}

/// One live, shared physical connection
#[derive(Clone)]
pub struct ManagedConnection {
    id: String,
    fingerprint: String,
    client: Arc<dyn KvClient>,
}

impl ManagedConnection {
    /// Short unique id, for log correlation
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sharing-key fingerprint this connection is stored under
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> Arc<dyn KvClient> {
        Arc::clone(&self.client)
    }

    /// Whether two handles point at the same physical connection
    #[must_use]
    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of the manager's maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections currently owned by the manager
    pub total_connections: usize,
    /// Distinct sharing keys with a live connection
    pub active_keys: usize,
    /// Sharing keys with a creation still in flight
    pub pending_keys: usize,
}

type PendingConnect = Shared<BoxFuture<'static, Result<ManagedConnection, PoolError>>>;

#[derive(Default)]
struct ManagerState {
    connections: HashMap<SharingKey, ManagedConnection>,
    pending: HashMap<SharingKey, PendingConnect>,
}

/// Owner of every physical connection, keyed by [`SharingKey`]
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<ProfileRegistry>,
    connector: Arc<dyn Connector>,
    state: Arc<Mutex<ManagerState>>,
}

impl ConnectionManager {
    /// Create a manager over the given registry and connector
    #[must_use]
    pub fn new(registry: Arc<ProfileRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    /// The registry this manager resolves profiles against
    #[must_use]
    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    /// Resolve a feature request into its effective configuration:
    /// disambiguation check, profile lookup, field-by-field override merge.
    pub fn resolve_effective(
        &self,
        request: &FeatureRequest,
    ) -> Result<ConnectionProfile, PoolError> {
        self.registry
            .require_explicit_name(request.profile.as_deref())?;
        let base = self.registry.resolve(request.profile.as_deref())?;
        Ok(base.merged_with(&request.overrides))
    }

    /// Return the shared connection for a feature request, creating it on
    /// first use.
    ///
    /// Cached keys return immediately. A key with a creation in flight
    /// joins that creation. Otherwise this call starts the one creation
    /// for the key: connect, then liveness-probe with the profile's retry
    /// budget. All concurrent callers for one key observe the same outcome.
    pub async fn get_connection(
        &self,
        request: &FeatureRequest,
    ) -> Result<ManagedConnection, PoolError> {
        let effective = self.resolve_effective(request)?;
        self.connection_for(&effective).await
    }

    /// As [`Self::get_connection`], for an already-merged configuration
    pub async fn connection_for(
        &self,
        effective: &ConnectionProfile,
    ) -> Result<ManagedConnection, PoolError> {
        let key = SharingKey::of(effective);

        let pending = {
            let mut state = self.state();

            if let Some(connection) = state.connections.get(&key) {
                debug!(
                    connection = connection.id(),
                    fingerprint = connection.fingerprint(),
                    "reusing store connection"
                );
                return Ok(connection.clone());
            }

            if let Some(in_flight) = state.pending.get(&key) {
                debug!(
                    fingerprint = %key.fingerprint(),
                    "joining in-flight connection attempt"
                );
                in_flight.clone()
            } else {
                let creation = self.begin_creation(key.clone(), effective.clone());
                state.pending.insert(key, creation.clone());
                creation
            }
        };

        pending.await
    }

    /// Build the single shared creation future for a key.
    ///
    /// Completion bookkeeping (store on success, clear pending either way)
    /// runs inside the future, so it executes exactly once no matter how
    /// many callers share it.
    fn begin_creation(&self, key: SharingKey, effective: ConnectionProfile) -> PendingConnect {
        let connector = Arc::clone(&self.connector);
        let state = Arc::clone(&self.state);
        let fingerprint = key.fingerprint();

        async move {
            let result = Self::connect_and_probe(&*connector, &effective, &fingerprint).await;
            let mut guard = state.lock().expect("connection state lock poisoned");

            match result {
                Ok(connection) => {
                    info!(
                        connection = connection.id(),
                        fingerprint = %fingerprint,
                        total = guard.connections.len() + 1,
                        "store connection established"
                    );
                    guard.connections.insert(key.clone(), connection.clone());
                    guard.pending.remove(&key);
                    Ok(connection)
                }
                Err(error) => {
                    // Clear the slot so a later call may retry from scratch
                    guard.pending.remove(&key);
                    warn!(fingerprint = %fingerprint, %error, "store connection failed");
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn connect_and_probe(
        connector: &dyn Connector,
        effective: &ConnectionProfile,
        fingerprint: &str,
    ) -> Result<ManagedConnection, PoolError> {
        debug!(fingerprint = %fingerprint, "opening new store connection");

        let client = connector
            .connect(effective)
            .await
            .map_err(|source| PoolError::ConnectionFailed {
                fingerprint: fingerprint.to_string(),
                attempts: 1,
                source: Arc::new(source),
            })?;

        let policy = RetryPolicy::new()
            .with_max_attempts(effective.retry_attempts)
            .with_delay(effective.retry_delay());

        let probe = {
            let client = Arc::clone(&client);
            move || {
                let client = Arc::clone(&client);
                async move { client.ping().await }
            }
        };

        match policy.execute(probe).await {
            RetryResult::Success(()) => Ok(ManagedConnection {
                id: Uuid::new_v4().simple().to_string(),
                fingerprint: fingerprint.to_string(),
                client,
            }),
            RetryResult::Exhausted {
                last_error,
                attempts,
            } => Err(PoolError::ConnectionFailed {
                fingerprint: fingerprint.to_string(),
                attempts,
                source: Arc::new(last_error),
            }),
        }
    }

    /// Snapshot of connection and in-flight counts; no side effects
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            total_connections: state.connections.len(),
            active_keys: state.connections.len(),
            pending_keys: state.pending.len(),
        }
    }

    /// Close every owned connection exactly once.
    ///
    /// Closes run concurrently; an individual failure is logged and does not
    /// stop the others. Safe to call with zero connections, and a second
    /// call finds nothing left to close.
    pub async fn shutdown(&self) {
        let connections: Vec<ManagedConnection> = {
            let mut state = self.state();
            state.pending.clear();
            state.connections.drain().map(|(_, conn)| conn).collect()
        };

        if connections.is_empty() {
            debug!("shutdown with no live store connections");
            return;
        }

        info!(count = connections.len(), "closing store connections");

        let closes = connections.into_iter().map(|connection| async move {
            match connection.client().close().await {
                Ok(()) => debug!(
                    connection = connection.id(),
                    fingerprint = connection.fingerprint(),
                    "store connection closed"
                ),
                Err(error) => warn!(
                    connection = connection.id(),
                    fingerprint = connection.fingerprint(),
                    %error,
                    "store connection failed to close cleanly"
                ),
            }
        });

        futures::future::join_all(closes).await;
        info!("all store connections closed");
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("connection state lock poisoned")
    }
}
