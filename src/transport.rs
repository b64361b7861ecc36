//! Transport seam between the pool and the wire
//!
//! [`KvClient`] is the enumerated operation surface the pool hands out;
//! [`Connector`] opens a client from an effective profile. The production
//! implementation rides on `redis::aio::ConnectionManager`, which reconnects
//! automatically and is cheap to clone (every clone shares one multiplexed
//! TCP connection). Tests substitute their own connector.

use async_trait::async_trait;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;
use tracing::debug;

use crate::config::{ConnectionProfile, IpFamily};

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The store client reported an error
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Connecting took longer than the profile's deadline
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The host could not be resolved to a usable address
    #[error("address resolution failed: {0}")]
    Resolve(String),

    /// Free-form transport failure, used by simulated transports
    #[error("{0}")]
    Other(String),
}

/// Enumerated operation surface of one live store connection.
///
/// Operations pass keys through verbatim; namespacing is the
/// [`crate::handle::FeatureHandle`]'s job.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> Result<(), TransportError>;

    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>, TransportError>;

    /// Write a string value with no expiry
    async fn set(&self, key: &str, value: &str) -> Result<(), TransportError>;

    /// Write a string value that expires after `ttl_seconds`
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<(), TransportError>;

    /// Delete keys in one batch; returns the number actually removed
    async fn del(&self, keys: &[String]) -> Result<u64, TransportError>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool, TransportError>;

    /// Set a key's expiry; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool, TransportError>;

    /// Remaining time-to-live in seconds (-2 missing key, -1 no expiry)
    async fn ttl(&self, key: &str) -> Result<i64, TransportError>;

    /// List keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, TransportError>;

    /// Read one hash field
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, TransportError>;

    /// Write one hash field
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), TransportError>;

    /// Read all fields of a hash
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, TransportError>;

    /// Push values onto the head of a list; returns the new length
    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError>;

    /// Push values onto the tail of a list; returns the new length
    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError>;

    /// Pop one value from the head of a list
    async fn lpop(&self, key: &str) -> Result<Option<String>, TransportError>;

    /// Pop one value from the tail of a list
    async fn rpop(&self, key: &str) -> Result<Option<String>, TransportError>;

    /// Trim a list to the inclusive range `[start, stop]`
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), TransportError>;

    /// Release the connection; called exactly once by the pool at shutdown
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens physical connections from effective profiles
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection described by `profile`.
    ///
    /// Implementations must respect the profile's connect timeout; the pool
    /// applies no outer deadline of its own.
    async fn connect(&self, profile: &ConnectionProfile)
        -> Result<Arc<dyn KvClient>, TransportError>;
}

/// Production connector backed by the `redis` crate
#[derive(Debug, Default)]
pub struct RedisConnector;

impl RedisConnector {
    /// Create the production connector
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn connection_info(profile: &ConnectionProfile, host: String) -> ConnectionInfo {
        let addr = profile.socket_path.as_ref().map_or_else(
            || ConnectionAddr::Tcp(host.clone(), profile.port),
            |path| ConnectionAddr::Unix(path.into()),
        );

        ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: profile.db,
                username: profile.username.clone(),
                password: profile.password.clone(),
                ..RedisConnectionInfo::default()
            },
        }
    }

    /// Pin the host to one address family when the profile asks for it
    async fn resolve_host(profile: &ConnectionProfile) -> Result<String, TransportError> {
        let Some(family) = profile.ip_family else {
            return Ok(profile.host.clone());
        };

        let addrs = lookup_host((profile.host.as_str(), profile.port))
            .await
            .map_err(|e| {
                TransportError::Resolve(format!("lookup of '{}' failed: {e}", profile.host))
            })?;

        addrs
            .into_iter()
            .find(|addr| match family {
                IpFamily::V4 => addr.is_ipv4(),
                IpFamily::V6 => addr.is_ipv6(),
            })
            .map(|addr| addr.ip().to_string())
            .ok_or_else(|| {
                TransportError::Resolve(format!(
                    "no {family:?} address found for '{}'",
                    profile.host
                ))
            })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn KvClient>, TransportError> {
        let host = Self::resolve_host(profile).await?;
        debug!(
            host = %host,
            port = profile.port,
            db = profile.db,
            "opening store connection"
        );

        let client = redis::Client::open(Self::connection_info(profile, host))?;

        let timeout = profile.connect_timeout();
        let manager = tokio::time::timeout(
            timeout,
            redis::aio::ConnectionManager::new(client),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout(timeout))??;

        Ok(Arc::new(RedisClient { manager }))
    }
}

/// Live client over one multiplexed store connection
struct RedisClient {
    manager: redis::aio::ConnectionManager,
}

#[async_trait]
impl KvClient for RedisClient {
    async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, TransportError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        Ok(conn.del(keys.to_vec()).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.expire(key, ttl_seconds).await?)
    }

    async fn ttl(&self, key: &str) -> Result<i64, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.ttl(key).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        Ok(conn.lpush(key, values.to_vec()).await?)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        Ok(conn.rpush(key, values.to_vec()).await?)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.lpop(key, None::<NonZeroUsize>).await?)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, TransportError> {
        let mut conn = self.manager.clone();
        Ok(conn.rpop(key, None::<NonZeroUsize>).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The multiplexed manager has no explicit teardown; QUIT asks the
        // server to drop the connection and the manager is then dropped.
        let mut conn = self.manager.clone();
        let quit: Result<String, redis::RedisError> =
            redis::cmd("QUIT").query_async(&mut conn).await;
        if let Err(e) = quit {
            debug!(error = %e, "QUIT on close returned an error");
        }
        Ok(())
    }
}
