//! Default/override merging.
//!
//! # Responsibilities
//! - Overlay each instance entry onto the shared defaults
//! - Derive the identity key and merge entries that share it
//! - Refuse (or, when allowed, alias) entries whose market types disagree
//!
//! # Merge Rules
//! ```text
//! field present in entry  → entry wins
//! field absent / ""       → defaults
//! same identity key again → symbols unioned, every other field from the first entry
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::{Defaults, InstanceSpec, MarketType, TradingMode};
use crate::resolve::identity::IdentityKey;

/// Resolution failed for the whole document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    /// Two entries for the same user resolve to different markets.
    #[error(
        "user {user}: instances[{first_index}] resolves to market_type {first} but instances[{second_index}] resolves to {second}; \
         entries for one user must share a market_type (use distinct user names or enable allow_market_type_alias)"
    )]
    MarketTypeConflict {
        user: String,
        first: MarketType,
        first_index: usize,
        second: MarketType,
        second_index: usize,
    },
}

/// Knobs that influence resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directory that live config names are resolved against.
    pub live_configs_dir: String,
    /// Downgrade market type conflicts to a warning, keeping the first entry.
    pub allow_market_type_alias: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            live_configs_dir: "configs/live".to_string(),
            allow_market_type_alias: false,
        }
    }
}

/// What one instance entry contributed to a resolved instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecOrigin {
    /// Index of the entry in the document.
    pub spec_index: usize,
    /// Symbols this entry added (already-present symbols are not repeated).
    pub symbols: Vec<String>,
    /// Explicit overrides that lost to an earlier entry for the same user.
    pub ignored_overrides: Vec<String>,
    /// Market type this entry asked for when it was aliased onto the first one.
    pub market_type_conflict: Option<MarketType>,
}

/// Fully populated parameters for one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInstance {
    pub identity_key: IdentityKey,
    pub user: String,
    pub market_type: MarketType,
    pub symbols: Vec<String>,
    pub live_config_name: String,
    pub live_config_path: String,
    pub long_wallet_exposure_limit: f64,
    pub short_wallet_exposure_limit: f64,
    pub assigned_balance: f64,
    pub long_mode: TradingMode,
    pub short_mode: TradingMode,
    pub provenance: Vec<SpecOrigin>,
}

impl ResolvedInstance {
    /// Balance explicitly assigned to this instance; 0 means none was given.
    pub fn explicit_balance(&self) -> Option<f64> {
        (self.assigned_balance > 0.0).then_some(self.assigned_balance)
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Stable hash over everything a worker sees.
    ///
    /// Symbol order does not matter and provenance is excluded, so reshuffling
    /// document entries does not restart a worker.
    pub fn content_hash(&self) -> u64 {
        let mut symbols: Vec<&str> = self.symbols.iter().map(String::as_str).collect();
        symbols.sort_unstable();

        let mut hasher = DefaultHasher::new();
        self.identity_key.hash(&mut hasher);
        self.user.hash(&mut hasher);
        self.market_type.hash(&mut hasher);
        symbols.hash(&mut hasher);
        self.live_config_name.hash(&mut hasher);
        self.live_config_path.hash(&mut hasher);
        self.long_wallet_exposure_limit.to_bits().hash(&mut hasher);
        self.short_wallet_exposure_limit.to_bits().hash(&mut hasher);
        self.assigned_balance.to_bits().hash(&mut hasher);
        self.long_mode.hash(&mut hasher);
        self.short_mode.hash(&mut hasher);
        hasher.finish()
    }
}

/// Returns true for 0, which the worker reads as "no exposure cap".
pub fn is_unlimited(exposure_limit: f64) -> bool {
    exposure_limit == 0.0
}

/// Merge every entry with the defaults.
///
/// Output order follows the first appearance of each identity key.
pub fn resolve(
    defaults: &Defaults,
    specs: &[InstanceSpec],
    options: &ResolveOptions,
) -> Result<Vec<ResolvedInstance>, ResolutionError> {
    let mut resolved: Vec<ResolvedInstance> = Vec::with_capacity(specs.len());
    let mut positions: HashMap<IdentityKey, usize> = HashMap::new();

    for spec in specs {
        let candidate = overlay(defaults, spec, options);
        match positions.get(&candidate.identity_key) {
            Some(&pos) => merge_into(&mut resolved[pos], candidate, spec, options)?,
            None => {
                positions.insert(candidate.identity_key.clone(), resolved.len());
                resolved.push(candidate);
            }
        }
    }

    Ok(resolved)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn overlay(defaults: &Defaults, spec: &InstanceSpec, options: &ResolveOptions) -> ResolvedInstance {
    let o = &spec.overrides;
    let spec_name = non_empty(&o.live_config_name);
    let live_config_name = spec_name.unwrap_or(&defaults.live_config_name).to_string();

    // A name override without a path override must not inherit the defaults' path,
    // which points at the defaults' file.
    let live_config_path = match (non_empty(&o.live_config_path), spec_name) {
        (Some(path), _) => path.to_string(),
        (None, Some(name)) => join_dir(&options.live_configs_dir, name),
        (None, None) => non_empty(&defaults.live_config_path)
            .map(str::to_string)
            .unwrap_or_else(|| join_dir(&options.live_configs_dir, &defaults.live_config_name)),
    };

    ResolvedInstance {
        identity_key: IdentityKey::from_user(&spec.user),
        user: spec.user.clone(),
        market_type: o.market_type.unwrap_or(defaults.market_type),
        symbols: spec.symbols.clone(),
        live_config_name,
        live_config_path,
        long_wallet_exposure_limit: o
            .long_wallet_exposure_limit
            .unwrap_or(defaults.long_wallet_exposure_limit),
        short_wallet_exposure_limit: o
            .short_wallet_exposure_limit
            .unwrap_or(defaults.short_wallet_exposure_limit),
        assigned_balance: o.assigned_balance.unwrap_or(defaults.assigned_balance),
        long_mode: o.long_mode.unwrap_or(defaults.long_mode),
        short_mode: o.short_mode.unwrap_or(defaults.short_mode),
        provenance: vec![SpecOrigin {
            spec_index: spec.index,
            symbols: spec.symbols.clone(),
            ignored_overrides: Vec::new(),
            market_type_conflict: None,
        }],
    }
}

fn join_dir(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    Path::new(dir).join(name).to_string_lossy().into_owned()
}

fn merge_into(
    existing: &mut ResolvedInstance,
    candidate: ResolvedInstance,
    spec: &InstanceSpec,
    options: &ResolveOptions,
) -> Result<(), ResolutionError> {
    let first_index = existing.provenance.first().map(|p| p.spec_index).unwrap_or_default();

    let mut market_type_conflict = None;
    if candidate.market_type != existing.market_type {
        if !options.allow_market_type_alias {
            return Err(ResolutionError::MarketTypeConflict {
                user: existing.user.clone(),
                first: existing.market_type,
                first_index,
                second: candidate.market_type,
                second_index: spec.index,
            });
        }
        tracing::warn!(
            user = %existing.user,
            kept = %existing.market_type,
            ignored = %candidate.market_type,
            first_index,
            second_index = spec.index,
            "market_type conflict aliased onto first entry"
        );
        market_type_conflict = Some(candidate.market_type);
    }

    let ignored_overrides = ignored_overrides(existing, &candidate, spec);

    let mut added = Vec::new();
    for symbol in candidate.symbols {
        if !existing.contains_symbol(&symbol) {
            existing.symbols.push(symbol.clone());
            added.push(symbol);
        }
    }

    existing.provenance.push(SpecOrigin {
        spec_index: spec.index,
        symbols: added,
        ignored_overrides,
        market_type_conflict,
    });
    Ok(())
}

/// Explicit overrides on a later entry that differ from the first entry's values.
fn ignored_overrides(existing: &ResolvedInstance, candidate: &ResolvedInstance, spec: &InstanceSpec) -> Vec<String> {
    let o = &spec.overrides;
    let mut fields = Vec::new();

    if non_empty(&o.live_config_name).is_some() && candidate.live_config_name != existing.live_config_name {
        fields.push("live_config_name");
    }
    if non_empty(&o.live_config_path).is_some() && candidate.live_config_path != existing.live_config_path {
        fields.push("live_config_path");
    }
    if o.market_type.is_some() && candidate.market_type != existing.market_type {
        fields.push("market_type");
    }
    if o.long_wallet_exposure_limit.is_some()
        && candidate.long_wallet_exposure_limit != existing.long_wallet_exposure_limit
    {
        fields.push("long_wallet_exposure_limit");
    }
    if o.short_wallet_exposure_limit.is_some()
        && candidate.short_wallet_exposure_limit != existing.short_wallet_exposure_limit
    {
        fields.push("short_wallet_exposure_limit");
    }
    if o.assigned_balance.is_some() && candidate.assigned_balance != existing.assigned_balance {
        fields.push("assigned_balance");
    }
    if o.long_mode.is_some() && candidate.long_mode != existing.long_mode {
        fields.push("long_mode");
    }
    if o.short_mode.is_some() && candidate.short_mode != existing.short_mode {
        fields.push("short_mode");
    }

    fields.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load;

    const SCENARIO: &str = r#"
defaults:
  live_config_name: matic.json
  market_type: futures
  long_mode: n
instances:
  - user: binance_01
    symbols: [ALICEUSDT, HBARUSDT]
    live_config_name: risky.json
  - user: binance_01
    symbols: [ETHUSDT, BTCUSDT]
  - user: binance_02
    symbols: [ALGOUSDT]
"#;

    fn resolve_doc(doc: &str, options: &ResolveOptions) -> Result<Vec<ResolvedInstance>, ResolutionError> {
        let (defaults, specs) = load(doc).unwrap();
        resolve(&defaults, &specs, options)
    }

    #[test]
    fn test_same_user_entries_merge() {
        let resolved = resolve_doc(SCENARIO, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved.len(), 2);

        let first = &resolved[0];
        assert_eq!(first.identity_key.as_str(), "binance_01");
        assert_eq!(first.symbols, vec!["ALICEUSDT", "HBARUSDT", "ETHUSDT", "BTCUSDT"]);
        assert_eq!(first.live_config_name, "risky.json");
        assert_eq!(first.live_config_path, "configs/live/risky.json");
        assert_eq!(first.provenance.len(), 2);
        assert_eq!(first.provenance[1].spec_index, 1);
        assert_eq!(first.provenance[1].symbols, vec!["ETHUSDT", "BTCUSDT"]);

        let second = &resolved[1];
        assert_eq!(second.user, "binance_02");
        assert_eq!(second.symbols, vec!["ALGOUSDT"]);
        assert_eq!(second.live_config_name, "matic.json");
        assert_eq!(second.market_type, MarketType::Futures);
        assert_eq!(second.long_mode, TradingMode::Normal);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let a = resolve_doc(SCENARIO, &ResolveOptions::default()).unwrap();
        let b = resolve_doc(SCENARIO, &ResolveOptions::default()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_overlapping_symbols_union_without_duplicates() {
        let doc = r#"
defaults:
  live_config_name: matic.json
instances:
  - user: u
    symbols: [A, B, C]
  - user: u
    symbols: [C, D, A, E]
"#;
        let resolved = resolve_doc(doc, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved[0].symbols, vec!["A", "B", "C", "D", "E"]);
        assert_eq!(resolved[0].provenance[1].symbols, vec!["D", "E"]);
    }

    #[test]
    fn test_later_overrides_ignored_and_recorded() {
        let doc = r#"
defaults:
  live_config_name: matic.json
instances:
  - user: u
    symbols: [A]
    assigned_balance: 100
  - user: u
    symbols: [B]
    assigned_balance: 250
    long_mode: gs
"#;
        let resolved = resolve_doc(doc, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved[0].assigned_balance, 100.0);
        assert_eq!(resolved[0].long_mode, TradingMode::Normal);
        assert_eq!(
            resolved[0].provenance[1].ignored_overrides,
            vec!["assigned_balance", "long_mode"]
        );
    }

    #[test]
    fn test_market_type_conflict_is_error() {
        let doc = SCENARIO.replacen("symbols: [ETHUSDT, BTCUSDT]", "symbols: [ETHUSDT, BTCUSDT]\n    market_type: spot", 1);
        let err = resolve_doc(&doc, &ResolveOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::MarketTypeConflict {
                user: "binance_01".into(),
                first: MarketType::Futures,
                first_index: 0,
                second: MarketType::Spot,
                second_index: 1,
            }
        );
        let message = err.to_string();
        assert!(message.contains("binance_01"));
        assert!(message.contains("futures"));
        assert!(message.contains("spot"));
    }

    #[test]
    fn test_market_type_alias_keeps_first() {
        let doc = SCENARIO.replacen("symbols: [ETHUSDT, BTCUSDT]", "symbols: [ETHUSDT, BTCUSDT]\n    market_type: spot", 1);
        let options = ResolveOptions {
            allow_market_type_alias: true,
            ..ResolveOptions::default()
        };
        let resolved = resolve_doc(&doc, &options).unwrap();
        assert_eq!(resolved[0].market_type, MarketType::Futures);
        assert_eq!(resolved[0].symbols.len(), 4);
        assert_eq!(resolved[0].provenance[1].market_type_conflict, Some(MarketType::Spot));
    }

    #[test]
    fn test_zero_balance_is_not_explicit() {
        let resolved = resolve_doc(SCENARIO, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved[0].explicit_balance(), None);
        assert!(is_unlimited(resolved[0].long_wallet_exposure_limit));
    }

    #[test]
    fn test_explicit_path_wins() {
        let doc = r#"
defaults:
  live_config_name: matic.json
  live_config_path: /srv/configs/matic.json
instances:
  - user: a
    symbols: [X]
  - user: b
    symbols: [Y]
    live_config_name: risky.json
  - user: c
    symbols: [Z]
    live_config_path: /tmp/custom.json
"#;
        let resolved = resolve_doc(doc, &ResolveOptions::default()).unwrap();
        assert_eq!(resolved[0].live_config_path, "/srv/configs/matic.json");
        assert_eq!(resolved[1].live_config_path, "configs/live/risky.json");
        assert_eq!(resolved[2].live_config_path, "/tmp/custom.json");
    }

    #[test]
    fn test_content_hash_ignores_symbol_order() {
        let resolved = resolve_doc(SCENARIO, &ResolveOptions::default()).unwrap();
        let mut shuffled = resolved[0].clone();
        shuffled.symbols.reverse();
        shuffled.provenance.clear();
        assert_eq!(resolved[0].content_hash(), shuffled.content_hash());

        shuffled.long_mode = TradingMode::Panic;
        assert_ne!(resolved[0].content_hash(), shuffled.content_hash());
    }
}
