//! Attempt state store.
//!
//! Values are stored as CAS literal text keyed by small integers. Two keys are
//! reserved for the current scene and the scene path; every other key is a
//! [`StateVariable`](crate::question::StateVariable) identifier. The store has
//! no rollback: the engine only writes after a batch has fully succeeded.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cas::CasValue;
use crate::error::{StateError, StateResult};

/// Storage key of one attempt-state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(pub i32);

impl StateKey {
    pub const SCENE_CURRENT: Self = Self(-1);
    pub const SCENE_PATH: Self = Self(-2);

    pub fn is_reserved(self) -> bool {
        self.0 < 0
    }
}

impl From<u32> for StateKey {
    fn from(id: u32) -> Self {
        // Question validation rejects identifiers above i32::MAX, so this
        // never saturates for a loaded question.
        Self(i32::try_from(id).unwrap_or(i32::MAX))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SCENE_CURRENT => write!(f, "SCENE_CURRENT"),
            Self::SCENE_PATH => write!(f, "SCENE_PATH"),
            Self(id) => write!(f, "{id}"),
        }
    }
}

/// Key/value contract the execution core depends on.
pub trait StateStore: Send + fmt::Debug {
    fn get(&self, key: StateKey) -> Option<String>;

    fn set(&mut self, key: StateKey, value: String);

    /// All stored values, ordered by key.
    fn values(&self) -> BTreeMap<StateKey, String>;

    fn get_or(&self, key: StateKey, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// In-memory store, one per attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemStateStore {
    values: BTreeMap<StateKey, String>,
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemStateStore {
    fn get(&self, key: StateKey) -> Option<String> {
        self.values.get(&key).cloned()
    }

    fn set(&mut self, key: StateKey, value: String) {
        self.values.insert(key, value);
    }

    fn values(&self) -> BTreeMap<StateKey, String> {
        self.values.clone()
    }
}

/// Serializable picture of an attempt's state, for the step-storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub seed: u64,
    pub values: BTreeMap<i32, String>,
}

impl AttemptSnapshot {
    pub fn capture(seed: u64, store: &dyn StateStore) -> Self {
        Self {
            seed,
            values: store.values().into_iter().map(|(k, v)| (k.0, v)).collect(),
        }
    }

    pub fn restore(&self) -> MemStateStore {
        let mut store = MemStateStore::new();
        for (key, value) in &self.values {
            store.set(StateKey(*key), value.clone());
        }
        store
    }

    pub fn to_json(&self) -> StateResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Snapshot {
            message: e.to_string(),
        })
    }

    pub fn from_json(source: &str) -> StateResult<Self> {
        serde_json::from_str(source).map_err(|e| StateError::Snapshot {
            message: e.to_string(),
        })
    }
}

/// Name of the active scene.
pub fn scene_current(store: &dyn StateStore) -> StateResult<String> {
    let raw = store
        .get(StateKey::SCENE_CURRENT)
        .ok_or(StateError::NoCurrentScene)?;
    match decode(StateKey::SCENE_CURRENT, &raw)? {
        CasValue::String(name) => Ok(name),
        other => Err(malformed(
            StateKey::SCENE_CURRENT,
            format!("expected a string, found {other}"),
        )),
    }
}

/// Previously exited scenes, oldest first. Missing means empty.
pub fn scene_path(store: &dyn StateStore) -> StateResult<Vec<String>> {
    let Some(raw) = store.get(StateKey::SCENE_PATH) else {
        return Ok(Vec::new());
    };
    decode(StateKey::SCENE_PATH, &raw)?
        .as_string_list()
        .ok_or_else(|| malformed(StateKey::SCENE_PATH, "expected a list of strings"))
}

pub fn encode_scene_name(name: &str) -> String {
    CasValue::string(name).to_cas()
}

pub fn encode_scene_path<S: AsRef<str>>(path: &[S]) -> String {
    CasValue::string_list(path.iter().map(|s| s.as_ref())).to_cas()
}

fn decode(key: StateKey, raw: &str) -> StateResult<CasValue> {
    CasValue::parse(raw).map_err(|e| malformed(key, e))
}

fn malformed(key: StateKey, message: impl fmt::Display) -> StateError {
    StateError::Malformed {
        key: key.0,
        message: message.to_string(),
    }
}
