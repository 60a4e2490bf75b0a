//! Persistence: which paths survive a restart, how they are written, and how
//! old records are upgraded on load.
//!
//! Persisted data is flat-by-path: `{"user.name": "Bob", "counter": 3}`,
//! not reassembled into the nested tree. The record handed to the codec is
//! `{"state": <flat data>, "version": N}`; with a max age the codec wraps it
//! again as `{"timestamp": ms, "state": <record>}`.

pub mod codec;
pub mod migrate;
pub mod storage;

pub use codec::{now_ms, Codec, JsonCodec, PersistenceCodec, YamlCodec};
pub use migrate::{identity, migrate_fn, BoxFuture, MigrateFn, DEFAULT_VERSION};
pub use storage::{provider_for, FileStorage, MemoryStorage, StorageAdapter, StorageProvider};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::path::get_nested_value;

/// Record field holding the stored schema version.
pub const VERSION_FIELD: &str = "version";

// ---------------------------------------------------------------------------
// PersistConfig
// ---------------------------------------------------------------------------

/// Paths eligible for persistence, each mapped to whether it is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistConfig(BTreeMap<String, bool>);

impl PersistConfig {
    pub fn new() -> Self {
        PersistConfig(BTreeMap::new())
    }

    pub fn insert(&mut self, path: &str, enabled: bool) {
        self.0.insert(path.to_string(), enabled);
    }

    pub fn is_enabled(&self, path: &str) -> bool {
        self.0.get(path).copied().unwrap_or(false)
    }

    /// Enabled paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(path, _)| path.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, bool)> for PersistConfig {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        PersistConfig(iter.into_iter().collect())
    }
}

/// Build a config that enables each of `paths`.
pub fn create_persist_config<S: AsRef<str>>(paths: &[S]) -> PersistConfig {
    paths
        .iter()
        .map(|p| (p.as_ref().to_string(), true))
        .collect()
}

// ---------------------------------------------------------------------------
// PersistOption
// ---------------------------------------------------------------------------

/// Whether, and what, to persist.
///
/// Deserializes from `false` / `true`, from a list of paths, or from a
/// `{path: bool}` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPersist", into = "RawPersist")]
pub enum PersistOption {
    #[default]
    Disabled,
    All,
    Paths(PersistConfig),
}

impl PersistOption {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, PersistOption::Disabled)
    }
}

impl From<bool> for PersistOption {
    fn from(flag: bool) -> Self {
        if flag {
            PersistOption::All
        } else {
            PersistOption::Disabled
        }
    }
}

impl From<PersistConfig> for PersistOption {
    fn from(config: PersistConfig) -> Self {
        PersistOption::Paths(config)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPersist {
    Flag(bool),
    List(Vec<String>),
    Map(PersistConfig),
}

impl From<RawPersist> for PersistOption {
    fn from(raw: RawPersist) -> Self {
        match raw {
            RawPersist::Flag(flag) => flag.into(),
            RawPersist::List(paths) => PersistOption::Paths(create_persist_config(paths.as_slice())),
            RawPersist::Map(config) => PersistOption::Paths(config),
        }
    }
}

impl From<PersistOption> for RawPersist {
    fn from(option: PersistOption) -> Self {
        match option {
            PersistOption::Disabled => RawPersist::Flag(false),
            PersistOption::All => RawPersist::Flag(true),
            PersistOption::Paths(config) => RawPersist::Map(config),
        }
    }
}

/// Reduce `state` to what should be written.
///
/// `All` keeps the whole tree. `Paths` yields a flat object keyed by each
/// enabled path verbatim; paths absent from the state are left out.
pub fn partialize(state: &Value, option: &PersistOption) -> Value {
    match option {
        PersistOption::All => state.clone(),
        PersistOption::Disabled => Value::Object(Map::new()),
        PersistOption::Paths(config) => {
            let mut out = Map::new();
            for path in config.paths() {
                if let Some(value) = get_nested_value(state, path) {
                    out.insert(path.to_string(), value.clone());
                }
            }
            Value::Object(out)
        }
    }
}

// ---------------------------------------------------------------------------
// Persister
// ---------------------------------------------------------------------------

/// Reads and writes one store's slot.
pub struct Persister {
    name: String,
    option: PersistOption,
    storage: Arc<dyn StorageAdapter>,
    codec: PersistenceCodec,
    version: u32,
    migrate: MigrateFn,
}

impl Persister {
    /// `migrate` defaults to [`identity`].
    pub fn new(
        name: String,
        option: PersistOption,
        storage: Arc<dyn StorageAdapter>,
        codec: PersistenceCodec,
        version: u32,
        migrate: Option<MigrateFn>,
    ) -> Self {
        Persister {
            name,
            option,
            storage,
            codec,
            version,
            migrate: migrate.unwrap_or_else(identity),
        }
    }

    /// Load the persisted flat data, migrating it when the stored version
    /// differs from the configured one.
    ///
    /// `Ok(None)` covers an empty slot and expired data. A rejected
    /// migration is an error and leaves the slot untouched; a successful
    /// one is written back under the current version.
    pub async fn load(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let Some(text) = self.storage.get_item(&self.name)? else {
            debug!(slot = %self.name, "nothing persisted");
            return Ok(None);
        };

        let Value::Object(mut record) = self.codec.deserialize(&text)? else {
            return Err(StoreError::Codec(format!(
                "slot '{}' does not hold a persisted record",
                self.name
            )));
        };
        let Some(state) = record.remove(codec::STATE_FIELD) else {
            debug!(slot = %self.name, "no state in persisted record");
            return Ok(None);
        };
        let stored_version = match record.get(VERSION_FIELD) {
            None | Some(Value::Null) => migrate::UNVERSIONED,
            Some(raw) => raw
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    StoreError::Codec(format!(
                        "slot '{}' has version {} where a u32 was expected",
                        self.name, raw
                    ))
                })?,
        };

        let state = if stored_version != self.version {
            let migrated =
                migrate::run_migration(&self.migrate, state, stored_version, self.version).await?;
            self.write_record(&migrated)?;
            migrated
        } else {
            state
        };

        match state {
            Value::Object(map) => {
                info!(slot = %self.name, entries = map.len(), "hydrated persisted state");
                Ok(Some(map))
            }
            Value::Null => Ok(None),
            other => {
                warn!(slot = %self.name, "persisted state is not an object");
                Err(StoreError::Codec(format!(
                    "slot '{}' holds a {} where an object was expected",
                    self.name,
                    value_kind(&other)
                )))
            }
        }
    }

    /// Partialize `state` and write it.
    pub fn save(&self, state: &Value) -> Result<(), StoreError> {
        self.write_record(&partialize(state, &self.option))
    }

    /// Remove the slot.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.remove_item(&self.name)?;
        debug!(slot = %self.name, "cleared persisted state");
        Ok(())
    }

    fn write_record(&self, data: &Value) -> Result<(), StoreError> {
        let mut record = Map::new();
        record.insert(codec::STATE_FIELD.to_string(), data.clone());
        record.insert(VERSION_FIELD.to_string(), Value::from(self.version));
        let text = self.codec.serialize(&Value::Object(record))?;
        self.storage.set_item(&self.name, &text)?;
        debug!(slot = %self.name, bytes = text.len(), "persisted state");
        Ok(())
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("name", &self.name)
            .field("option", &self.option)
            .field("codec", &self.codec)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
