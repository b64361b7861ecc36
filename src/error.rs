//! Error taxonomy for the pooling layer
//!
//! Registration and connection errors live in [`PoolError`]; per-operation
//! store errors live in [`StoreError`]. `PoolError` is `Clone` so a single
//! failed connection attempt can be delivered to every concurrent waiter.

use std::sync::Arc;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by profile registration and connection acquisition
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Profile naming rules were violated at registration time
    #[error("profile configuration conflict: {reason}")]
    ConfigConflict {
        /// What collided
        reason: String,
    },

    /// Several profiles are registered and the caller did not pick one
    #[error(
        "multiple profiles registered ({}); specify a profile name to disambiguate",
        format_names(.available)
    )]
    AmbiguousProfile {
        /// Names of the registered profiles
        available: Vec<String>,
    },

    /// The requested profile name is not registered
    #[error("{}", profile_not_found_message(.name, .available))]
    ProfileNotFound {
        /// The name that was requested
        name: String,
        /// Names registered at the time of the lookup
        available: Vec<String>,
    },

    /// Opening or probing a physical connection failed after all retries
    #[error("connection {fingerprint} failed after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        /// Sharing-key fingerprint of the connection that failed
        fingerprint: String,
        /// Number of liveness-probe attempts made
        attempts: u32,
        /// Last underlying transport error
        source: Arc<TransportError>,
    },

    /// An async profile source failed to produce a profile
    #[error("profile source failed: {reason}")]
    ProfileSource {
        /// What the source reported
        reason: String,
    },
}

fn format_names(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn profile_not_found_message(name: &str, available: &[String]) -> String {
    if available.is_empty() {
        format!(
            "profile '{name}' not found: no profiles have been registered; \
             register profiles before acquiring features"
        )
    } else {
        format!(
            "profile '{name}' not found among {} registered profile(s): [{}]",
            available.len(),
            format_names(available)
        )
    }
}

/// Errors raised by store operations on a [`crate::handle::FeatureHandle`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying transport reported a failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A structured value could not be serialized
    #[error("JSON encoding failed for key '{key}': {source}")]
    Json {
        /// Namespace-relative key the value was bound for
        key: String,
        /// Serializer error
        #[source]
        source: serde_json::Error,
    },

    /// The cache-aside factory failed to produce a value
    #[error("cache factory failed: {0}")]
    Factory(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_distinguishes_empty_registry() {
        let empty = PoolError::ProfileNotFound {
            name: "sessions".to_string(),
            available: vec![],
        };
        assert!(empty.to_string().contains("no profiles have been registered"));

        let populated = PoolError::ProfileNotFound {
            name: "sessions".to_string(),
            available: vec!["cache".to_string(), "queues".to_string()],
        };
        let message = populated.to_string();
        assert!(message.contains("2 registered profile(s)"));
        assert!(message.contains("'cache'"));
        assert!(message.contains("'queues'"));
    }

    #[test]
    fn ambiguous_profile_lists_choices() {
        let err = PoolError::AmbiguousProfile {
            available: vec!["a".to_string(), "b".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("'a', 'b'"));
    }
}
