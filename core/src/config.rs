//! Store configuration.
//!
//! `StoreSettings` is the declarative part (prefix, what to persist,
//! versioning, expiry, logging) and can be loaded from YAML or JSON.
//! `StoreOptions` adds the runtime hooks that cannot live in a file:
//! middleware, computed values, plugins, storage, codec and migration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BoxError, StoreError};
use crate::hash::stable_hash;
use crate::persist::{
    migrate_fn, provider_for, Codec, MigrateFn, PersistOption, StorageAdapter, StorageProvider,
    DEFAULT_VERSION,
};
use crate::plugin::{ComputedFn, Middleware, Plugin};

// ---------------------------------------------------------------------------
// StoreSettings
// ---------------------------------------------------------------------------

/// Declarative store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Namespace folded into the storage slot name.
    pub prefix: String,
    /// What to persist.
    pub persist: PersistOption,
    /// Log every state transition at debug level.
    pub logging: bool,
    /// Schema version of persisted data.
    pub version: u32,
    /// Persisted data older than this is discarded on load.
    pub max_age_ms: Option<u64>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            prefix: String::new(),
            persist: PersistOption::Disabled,
            logging: false,
            version: DEFAULT_VERSION,
            max_age_ms: None,
        }
    }
}

impl StoreSettings {
    pub fn from_yaml_str(text: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load from a `.yaml`, `.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(StoreError::Config(format!(
                "unsupported settings file '{}': expected .yaml, .yml or .json",
                path.display()
            ))),
        }
    }

    /// Hash of the settings that identify a storage slot.
    ///
    /// `version` is left out so that bumping it reaches the previous slot
    /// and triggers migration instead of starting from an empty one.
    pub fn options_hash(&self) -> String {
        let mut fingerprint = Map::new();
        fingerprint.insert("prefix".into(), Value::from(self.prefix.clone()));
        fingerprint.insert(
            "persist".into(),
            serde_json::to_value(&self.persist).unwrap_or(Value::Null),
        );
        fingerprint.insert("logging".into(), Value::from(self.logging));
        fingerprint.insert(
            "max_age_ms".into(),
            self.max_age_ms.map(Value::from).unwrap_or(Value::Null),
        );
        stable_hash(&Value::Object(fingerprint))
    }
}

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Settings plus runtime hooks, assembled with the `with_*` builders.
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub settings: StoreSettings,
    pub middleware: Vec<Middleware>,
    pub computed_values: BTreeMap<String, ComputedFn>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Defaults to a `FileStorage` at `FileStorage::default_dir()`.
    pub storage_provider: Option<StorageProvider>,
    /// Defaults to `JsonCodec`.
    pub codec: Option<Arc<dyn Codec>>,
    /// Defaults to identity.
    pub migrate: Option<MigrateFn>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: StoreSettings) -> Self {
        StoreOptions {
            settings,
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.prefix = prefix.into();
        self
    }

    pub fn with_persist(mut self, persist: impl Into<PersistOption>) -> Self {
        self.settings.persist = persist.into();
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.settings.logging = logging;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.settings.version = version;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.settings.max_age_ms = Some(max_age.as_millis() as u64);
        self
    }

    pub fn with_middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(f));
        self
    }

    pub fn with_computed<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.computed_values.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage_provider = Some(provider_for(storage));
        self
    }

    pub fn with_storage_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Arc<dyn StorageAdapter> + Send + Sync + 'static,
    {
        self.storage_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_migrate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, u32) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.migrate = Some(migrate_fn(f));
        self
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("settings", &self.settings)
            .field("middleware", &self.middleware.len())
            .field("computed_values", &self.computed_values.keys().collect::<Vec<_>>())
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("storage_provider", &self.storage_provider.is_some())
            .field("codec", &self.codec.is_some())
            .field("migrate", &self.migrate.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::create_persist_config;

    #[test]
    fn defaults() {
        let s = StoreSettings::default();
        assert_eq!(s.prefix, "");
        assert_eq!(s.persist, PersistOption::Disabled);
        assert!(!s.logging);
        assert_eq!(s.version, 1);
        assert_eq!(s.max_age_ms, None);
    }

    #[test]
    fn yaml_settings_with_path_list() {
        let yaml = "prefix: demo\npersist:\n  - user.name\n  - theme\nversion: 2\nmax_age_ms: 3600000\n";
        let s = StoreSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(s.prefix, "demo");
        assert_eq!(
            s.persist,
            PersistOption::Paths(create_persist_config(&["user.name", "theme"]))
        );
        assert_eq!(s.version, 2);
        assert_eq!(s.max_age_ms, Some(3_600_000));
        assert!(!s.logging);
    }

    #[test]
    fn json_settings_with_flag() {
        let s = StoreSettings::from_json_str(r#"{"persist": true, "logging": true}"#).unwrap();
        assert_eq!(s.persist, PersistOption::All);
        assert!(s.logging);
        assert_eq!(s.version, 1);
    }

    #[test]
    fn bad_settings_are_config_errors() {
        let err = StoreSettings::from_json_str(r#"{"version": "two"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("store.yml");
        std::fs::write(&yaml, "prefix: from-yaml\n").unwrap();
        assert_eq!(StoreSettings::load(&yaml).unwrap().prefix, "from-yaml");

        let json = dir.path().join("store.json");
        std::fs::write(&json, r#"{"prefix": "from-json"}"#).unwrap();
        assert_eq!(StoreSettings::load(&json).unwrap().prefix, "from-json");

        let toml = dir.path().join("store.toml");
        std::fs::write(&toml, "prefix = 'x'").unwrap();
        assert!(matches!(StoreSettings::load(&toml), Err(StoreError::Config(_))));
    }

    #[test]
    fn options_hash_ignores_version() {
        let v1 = StoreSettings::default();
        let v2 = StoreSettings {
            version: 2,
            ..StoreSettings::default()
        };
        assert_eq!(v1.options_hash(), v2.options_hash());
    }

    #[test]
    fn options_hash_tracks_prefix_and_persist() {
        let base = StoreSettings::default();
        let prefixed = StoreSettings {
            prefix: "other".into(),
            ..StoreSettings::default()
        };
        let persisted = StoreSettings {
            persist: PersistOption::All,
            ..StoreSettings::default()
        };
        assert_ne!(base.options_hash(), prefixed.options_hash());
        assert_ne!(base.options_hash(), persisted.options_hash());
    }

    #[test]
    fn builder_sets_fields() {
        let options = StoreOptions::new()
            .with_prefix("app")
            .with_persist(true)
            .with_version(3)
            .with_max_age(Duration::from_secs(2))
            .with_logging(true)
            .with_middleware(|s| s)
            .with_computed("double", |s| s.clone());
        assert_eq!(options.settings.prefix, "app");
        assert_eq!(options.settings.persist, PersistOption::All);
        assert_eq!(options.settings.version, 3);
        assert_eq!(options.settings.max_age_ms, Some(2000));
        assert!(options.settings.logging);
        assert_eq!(options.middleware.len(), 1);
        assert!(options.computed_values.contains_key("double"));
        assert!(format!("{:?}", options).contains("double"));
    }
}
