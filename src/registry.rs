//! Validated, append-only storage of connection profiles
//!
//! Profiles are registered once at bootstrap and looked up for every feature
//! request afterwards. Naming rules are enforced per registration batch: at
//! most one profile may omit a name, and an unnamed profile may not coexist
//! with one explicitly named `"default"`.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::config::{ConnectionProfile, DEFAULT_PROFILE};
use crate::error::PoolError;

/// Registry of named connection profiles.
///
/// Append-only for the process lifetime: later registrations may replace an
/// entry under the same name but never remove one.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<String, ConnectionProfile>>,
}

impl ProfileRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of profiles.
    ///
    /// The batch is validated as a whole before anything is stored, so a
    /// conflicting batch leaves the registry untouched. A profile without a
    /// key prefix receives its name as the default prefix.
    pub fn register(&self, profiles: Vec<ConnectionProfile>) -> Result<(), PoolError> {
        Self::validate_names(&profiles)?;

        let mut map = self
            .profiles
            .write()
            .expect("profile registry lock poisoned");

        for mut profile in profiles {
            let name = profile.effective_name().to_string();
            if profile.key_prefix.is_none() {
                profile.key_prefix = Some(name.clone());
            }
            debug!(profile = %name, "registered connection profile");
            map.insert(name, profile);
        }

        Ok(())
    }

    fn validate_names(profiles: &[ConnectionProfile]) -> Result<(), PoolError> {
        let unnamed = profiles.iter().filter(|p| p.name.is_none()).count();

        if unnamed > 1 {
            return Err(PoolError::ConfigConflict {
                reason: format!(
                    "{unnamed} profiles have no name; when registering several profiles \
                     each must carry a unique name"
                ),
            });
        }

        if unnamed == 1
            && profiles
                .iter()
                .any(|p| p.name.as_deref() == Some(DEFAULT_PROFILE))
        {
            return Err(PoolError::ConfigConflict {
                reason: format!(
                    "one profile has no name (and would occupy '{DEFAULT_PROFILE}') while \
                     another is explicitly named '{DEFAULT_PROFILE}'"
                ),
            });
        }

        Ok(())
    }

    /// Resolve a profile by name.
    ///
    /// With no name and exactly one registered profile, that profile is
    /// returned regardless of its own name. With no name and several
    /// profiles, resolution is ambiguous.
    pub fn resolve(&self, name: Option<&str>) -> Result<ConnectionProfile, PoolError> {
        let map = self
            .profiles
            .read()
            .expect("profile registry lock poisoned");

        if name.is_none() && map.len() == 1 {
            if let Some(profile) = map.values().next() {
                return Ok(profile.clone());
            }
        }

        if name.is_none() && map.len() > 1 {
            return Err(PoolError::AmbiguousProfile {
                available: Self::sorted_names(&map),
            });
        }

        let target = name.unwrap_or(DEFAULT_PROFILE);
        map.get(target)
            .cloned()
            .ok_or_else(|| PoolError::ProfileNotFound {
                name: target.to_string(),
                available: Self::sorted_names(&map),
            })
    }

    /// Fail early when several profiles exist and the caller named none.
    ///
    /// Used by feature registration so callers disambiguate at wiring time
    /// rather than at first use.
    pub fn require_explicit_name(&self, name: Option<&str>) -> Result<(), PoolError> {
        if name.is_some() {
            return Ok(());
        }

        let map = self
            .profiles
            .read()
            .expect("profile registry lock poisoned");
        if map.len() > 1 {
            return Err(PoolError::AmbiguousProfile {
                available: Self::sorted_names(&map),
            });
        }

        Ok(())
    }

    /// Names of all registered profiles, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let map = self
            .profiles
            .read()
            .expect("profile registry lock poisoned");
        Self::sorted_names(&map)
    }

    /// Number of registered profiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles
            .read()
            .expect("profile registry lock poisoned")
            .len()
    }

    /// Whether no profiles are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sorted_names(map: &HashMap<String, ConnectionProfile>) -> Vec<String> {
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}
