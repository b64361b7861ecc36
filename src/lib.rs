//! `kvpool` - connection registry and pooling for Redis-compatible stores
//!
//! Declared connection profiles go in, shared live connections come out.
//! Independent features receive namespaced handles over those connections,
//! and the whole set is torn down cleanly at process shutdown.
//!
//! ```rust,no_run
//! use kvpool::{ConnectionProfile, FeatureRequest, KvPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = KvPool::builder()
//!     .profile(ConnectionProfile::named("sessions"))
//!     .build()
//!     .await?;
//!
//! let sessions = pool
//!     .acquire_feature(FeatureRequest::profile("sessions"))
//!     .await?;
//! sessions.set_ex("token:abc", "user-1", 3600).await?;
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

/// Connection profiles, overrides and settings-file loading
pub mod config;
pub mod error;
/// Namespaced client handles
pub mod handle;
pub mod logging;
/// Connection ownership: keying, dedup, retry, shutdown
pub mod manager;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{
    ConfigError, ConnectionProfile, FeatureRequest, IpFamily, ProfileOverrides, Settings,
    DEFAULT_PROFILE,
};
pub use error::{PoolError, StoreError};
pub use handle::FeatureHandle;
pub use manager::{ConnectionManager, ManagedConnection, PoolStats, SharingKey};
pub use pool::{KvPool, KvPoolBuilder, LazyFeatureHandle, ProfileFactory, ProfileSource};
pub use registry::ProfileRegistry;
pub use retry::{RetryPolicy, RetryResult};
pub use session::SessionStore;
pub use transport::{Connector, KvClient, RedisConnector, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
