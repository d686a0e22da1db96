//! Instance identity and collision reporting.
//!
//! # Responsibilities
//! - Define the identity key an instance is deduplicated by
//! - Audit the resolved set: which entries were folded together, and what was lost
//!
//! # Design Decisions
//! - The key is the user alone. `market_type` is deliberately not part of it, so
//!   one account cannot run a spot and a futures worker side by side under one name
//! - Collisions are reported, never fatal here; fatal conflicts are the resolver's call

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::schema::MarketType;
use crate::resolve::resolver::{ResolvedInstance, SpecOrigin};

/// Deduplication key for instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_user(user: &str) -> Self {
        Self(user.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(user: &str) -> Self {
        Self::from_user(user)
    }
}

/// Audit record for an identity key fed by more than one document entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollisionReport {
    pub identity_key: IdentityKey,
    /// Document indices of every entry folded into this key, in order.
    pub spec_indices: Vec<usize>,
    /// Per entry: symbols it contributed and overrides that were dropped.
    pub origins: Vec<SpecOrigin>,
    /// Market types that were aliased onto the first entry's.
    pub aliased_market_types: Vec<MarketType>,
    /// The key appeared more than once in the resolved set itself.
    pub duplicate_entries: bool,
}

impl CollisionReport {
    pub fn ignored_override_count(&self) -> usize {
        self.origins.iter().map(|o| o.ignored_overrides.len()).sum()
    }
}

/// Produce one report per identity key that came from several entries.
///
/// Reports are ordered by identity key.
pub fn validate(resolved: &[ResolvedInstance]) -> Vec<CollisionReport> {
    let mut grouped: BTreeMap<&IdentityKey, Vec<&ResolvedInstance>> = BTreeMap::new();
    for instance in resolved {
        grouped.entry(&instance.identity_key).or_default().push(instance);
    }

    grouped
        .into_iter()
        .filter_map(|(key, instances)| {
            let origins: Vec<SpecOrigin> = instances
                .iter()
                .flat_map(|i| i.provenance.iter().cloned())
                .collect();
            let duplicate_entries = instances.len() > 1;
            if origins.len() < 2 && !duplicate_entries {
                return None;
            }

            Some(CollisionReport {
                identity_key: key.clone(),
                spec_indices: origins.iter().map(|o| o.spec_index).collect(),
                aliased_market_types: origins.iter().filter_map(|o| o.market_type_conflict).collect(),
                origins,
                duplicate_entries,
            })
        })
        .collect()
}
