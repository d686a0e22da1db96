//! Desired-vs-live diffing.
//!
//! # Responsibilities
//! - Compare the resolved set with the supervisor's process table
//! - Emit at most one action per identity key per cycle
//! - Remember in-flight actions so an unchanged world yields no new actions

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::reconcile::state::{KeyState, KeyTrack};
use crate::resolve::{IdentityKey, ResolvedInstance};
use crate::supervisor::ProcessRecord;

/// Work for the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "target", rename_all = "lowercase")]
pub enum Action {
    Start(ResolvedInstance),
    Stop(IdentityKey),
    Restart(ResolvedInstance),
}

impl Action {
    pub fn key(&self) -> &IdentityKey {
        match self {
            Action::Start(instance) | Action::Restart(instance) => &instance.identity_key,
            Action::Stop(key) => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Start(_) => "start",
            Action::Stop(_) => "stop",
            Action::Restart(_) => "restart",
        }
    }
}

/// Live process table as seen by the reconciler.
pub type LiveTable = BTreeMap<IdentityKey, ProcessRecord>;

/// Tracks every key the manager is responsible for.
#[derive(Debug, Default)]
pub struct Reconciler {
    tracks: BTreeMap<IdentityKey, KeyTrack>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, key: &IdentityKey) -> KeyState {
        self.tracks.get(key).map(|t| t.state).unwrap_or(KeyState::Absent)
    }

    /// Compute the actions that move `live` toward `desired`.
    ///
    /// Starts and restarts follow `desired` order; stops follow key order.
    pub fn reconcile(&mut self, desired: &[ResolvedInstance], live: &LiveTable) -> Vec<Action> {
        self.observe(live);

        let mut actions = Vec::new();
        let mut wanted: HashSet<&IdentityKey> = HashSet::new();

        for instance in desired {
            let key = &instance.identity_key;
            if !wanted.insert(key) {
                continue;
            }
            if let Some(action) = self.converge(instance, live.get(key)) {
                actions.push(action);
            }
        }

        let mut stops = BTreeSet::new();
        for (key, track) in self.tracks.iter_mut() {
            if wanted.contains(key) {
                continue;
            }
            let draining_for_removal = track.state == KeyState::Draining && track.target_hash.is_none();
            if live.contains_key(key) && !draining_for_removal {
                track.transition(key.as_str(), KeyState::Draining);
                track.target_hash = None;
                stops.insert(key.clone());
            }
        }
        // Orphans: running workers nobody asked for.
        for key in live.keys() {
            if !wanted.contains(key) && !self.tracks.contains_key(key) {
                self.tracks.insert(key.clone(), KeyTrack::new(KeyState::Draining, None));
                stops.insert(key.clone());
            }
        }
        actions.extend(stops.into_iter().map(Action::Stop));

        self.tracks
            .retain(|key, track| wanted.contains(key) || !matches!(track.state, KeyState::Gone | KeyState::Absent));

        actions
    }

    /// The supervisor could not act on `key` this cycle; recompute it next cycle.
    pub fn defer(&mut self, key: &IdentityKey) {
        if self.tracks.remove(key).is_some() {
            tracing::debug!(user = %key, "Action deferred, key will be recomputed");
        }
    }

    /// Apply what the supervisor has confirmed since the last cycle.
    fn observe(&mut self, live: &LiveTable) {
        for (key, track) in self.tracks.iter_mut() {
            let record = live.get(key);
            match (track.state, record) {
                (KeyState::Desired, Some(r)) | (KeyState::Draining, Some(r))
                    if track.target_hash == Some(r.config_hash) && r.state.is_running() =>
                {
                    track.transition(key.as_str(), KeyState::Running);
                }
                (KeyState::Draining, None) | (KeyState::Running, None) => {
                    track.transition(key.as_str(), KeyState::Gone);
                }
                _ => {}
            }
        }
    }

    fn converge(&mut self, instance: &ResolvedInstance, record: Option<&ProcessRecord>) -> Option<Action> {
        let key = &instance.identity_key;
        let hash = instance.content_hash();

        let untracked = self.tracks.get(key).map_or(true, |t| t.state == KeyState::Gone);
        if untracked {
            return self.adopt(instance, hash, record);
        }
        let track = self.tracks.get_mut(key)?;

        // A removal is still draining; the key comes back once it is gone.
        if track.state == KeyState::Draining && track.target_hash.is_none() {
            return None;
        }
        if track.target_hash == Some(hash) {
            return None;
        }

        match record {
            None => {
                track.transition(key.as_str(), KeyState::Desired);
                track.target_hash = Some(hash);
                Some(Action::Start(instance.clone()))
            }
            Some(r) if r.state.is_busy() => None,
            Some(_) => {
                track.transition(key.as_str(), KeyState::Draining);
                track.target_hash = Some(hash);
                Some(Action::Restart(instance.clone()))
            }
        }
    }

    /// First sight of a key (or a key that had fully drained).
    fn adopt(&mut self, instance: &ResolvedInstance, hash: u64, record: Option<&ProcessRecord>) -> Option<Action> {
        let key = instance.identity_key.clone();
        match record {
            None => {
                self.tracks.insert(key, KeyTrack::new(KeyState::Desired, Some(hash)));
                Some(Action::Start(instance.clone()))
            }
            Some(r) if r.state.is_busy() => None,
            Some(r) if r.config_hash == hash => {
                let state = if r.state.is_running() {
                    KeyState::Running
                } else {
                    KeyState::Desired
                };
                self.tracks.insert(key, KeyTrack::new(state, Some(hash)));
                None
            }
            Some(_) => {
                self.tracks.insert(key, KeyTrack::new(KeyState::Draining, Some(hash)));
                Some(Action::Restart(instance.clone()))
            }
        }
    }
}
