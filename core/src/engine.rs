//! The store engine.
//!
//! A `Store` owns one live state tree and wires path writes, history,
//! middleware, subscribers and persistence around it. Every transition
//! replaces the live `Arc<Value>` wholesale; nothing is edited in place.
//!
//! # Transition pipeline (`set_deep`)
//!
//! 1. Resolve the new value (literal, or updater over the current value)
//! 2. Write it into a copy of the state at `path`
//! 3. Record the previous state in history, dropping any redo
//! 4. Run the middleware chain over the candidate
//! 5. Commit, notify subscribers with `(next, previous)`
//! 6. Persist (a failed write is returned; the commit stands)
//!
//! Steps 1-6 run as one transition: `set_deep`, `undo`, `redo` and the merge
//! step of `rehydrate` are serialized by a reentrant transition lock, so an
//! updater always sees the value committed by the previous transition and
//! history lines up with commits. The lock is reentrant so updaters,
//! middleware and listeners may call back into the store on the same thread.
//! Only `dispatch` leaves a gap between its read and its writes.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::StoreOptions;
use crate::error::StoreError;
use crate::hash::{stable_hash, storage_name};
use crate::history::{HistoryStack, Snapshot};
use crate::path::{get_nested_value, merge_persisted, set_nested_value};
use crate::persist::{FileStorage, JsonCodec, PersistenceCodec, Persister, StorageAdapter};
use crate::plugin::{ComputedFn, MiddlewareChain};
use crate::selector::{select, shallow_equal, Selector};

/// Subscriber callback: `(next, previous)`.
pub type Listener = Arc<dyn Fn(&Snapshot, &Snapshot) + Send + Sync>;

/// Updater over the value currently at a path.
pub type Updater = Box<dyn FnOnce(Option<&Value>) -> Value + Send>;

/// New value for `set_deep`: a literal, or a function of the current value.
pub enum Update {
    Value(Value),
    With(Updater),
}

impl Update {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(Option<&Value>) -> Value + Send + 'static,
    {
        Update::With(Box::new(f))
    }

    fn resolve(self, current: Option<&Value>) -> Value {
        match self {
            Update::Value(value) => value,
            Update::With(f) => f(current),
        }
    }
}

impl From<Value> for Update {
    fn from(value: Value) -> Self {
        Update::Value(value)
    }
}

impl std::fmt::Debug for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Update::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Update::With(_) => f.write_str("With(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Core {
    state: Snapshot,
    history: HistoryStack,
}

struct Inner {
    transition: ReentrantMutex<()>,
    core: Mutex<Core>,
    middleware: RwLock<MiddlewareChain>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    computed: BTreeMap<String, ComputedFn>,
    persister: Option<Persister>,
    storage_name: String,
    logging: bool,
    hydrated: AtomicBool,
}

/// Handle to a store. Clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

/// Build a store from any serializable initial state.
///
/// Hydrates from storage when persistence is enabled. A failed load,
/// including a rejected migration, fails construction.
pub async fn create_store<S: Serialize>(
    initial: S,
    options: StoreOptions,
) -> Result<Store, StoreError> {
    let initial = serde_json::to_value(initial)?;
    Store::create(initial, options).await
}

impl Store {
    /// See [`create_store`].
    pub async fn create(initial: Value, options: StoreOptions) -> Result<Store, StoreError> {
        let StoreOptions {
            settings,
            middleware,
            computed_values,
            plugins,
            storage_provider,
            codec,
            migrate,
        } = options;

        let name = storage_name(
            &settings.prefix,
            &stable_hash(&initial),
            &settings.options_hash(),
        );

        let persister = if settings.persist.is_enabled() {
            let storage: Arc<dyn StorageAdapter> = match storage_provider {
                Some(provider) => provider(),
                None => Arc::new(FileStorage::default_location()?),
            };
            let codec = PersistenceCodec::new(
                codec.unwrap_or_else(|| Arc::new(JsonCodec)),
                settings.max_age_ms,
            );
            Some(Persister::new(
                name.clone(),
                settings.persist.clone(),
                storage,
                codec,
                settings.version,
                migrate,
            ))
        } else {
            None
        };

        let mut state = initial;
        let mut hydrated = false;
        if let Some(persister) = &persister {
            if let Some(persisted) = persister.load().await? {
                merge_persisted(&mut state, persisted);
            }
            hydrated = true;
        }

        let store = Store {
            inner: Arc::new(Inner {
                transition: ReentrantMutex::new(()),
                core: Mutex::new(Core {
                    state: Arc::new(state),
                    history: HistoryStack::new(),
                }),
                middleware: RwLock::new(MiddlewareChain::new(middleware)),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                computed: computed_values,
                persister,
                storage_name: name,
                logging: settings.logging,
                hydrated: AtomicBool::new(hydrated),
            }),
        };

        for plugin in &plugins {
            plugin.on_init(&store);
            if let Some(stage) = plugin.middleware() {
                store.inner.middleware.write().push(stage);
            }
            debug!(plugin = plugin.name(), store = %store.inner.storage_name, "plugin initialized");
        }

        info!(
            store = %store.inner.storage_name,
            persist = store.inner.persister.is_some(),
            hydrated,
            "store created"
        );
        Ok(store)
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Current state snapshot.
    pub fn get_state(&self) -> Snapshot {
        self.inner.core.lock().state.clone()
    }

    /// Current state deserialized into `T`.
    pub fn get_state_as<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let state = self.get_state();
        Ok(T::deserialize(&*state)?)
    }

    /// Value at `path` in the current state.
    pub fn get(&self, path: &str) -> Option<Value> {
        get_nested_value(&self.get_state(), path).cloned()
    }

    /// Evaluate the named computed value against the current state.
    pub fn computed(&self, name: &str) -> Option<Value> {
        let f = self.inner.computed.get(name)?;
        Some(f(&self.get_state()))
    }

    pub fn computed_names(&self) -> impl Iterator<Item = &str> {
        self.inner.computed.keys().map(String::as_str)
    }

    /// Evaluate `path[:alias]` selectors against the current state.
    pub fn use_selectors<S: AsRef<str>>(&self, selectors: &[S]) -> Map<String, Value> {
        select(&self.get_state(), &Selector::parse_all(selectors))
    }

    pub fn storage_name(&self) -> &str {
        &self.inner.storage_name
    }

    /// True once persisted state has been loaded. Always false when
    /// persistence is disabled.
    pub fn has_hydrated(&self) -> bool {
        self.inner.hydrated.load(Ordering::Acquire)
    }

    pub fn can_undo(&self) -> bool {
        self.inner.core.lock().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.core.lock().history.can_redo()
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Write at `path`. See the module docs for the pipeline.
    pub fn set_deep(&self, path: &str, update: impl Into<Update>) -> Result<(), StoreError> {
        let _transition = self.inner.transition.lock();
        let previous = self.get_state();
        let value = update.into().resolve(get_nested_value(&previous, path));

        let mut candidate = (*previous).clone();
        set_nested_value(&mut candidate, path, value);

        self.inner.core.lock().history.record(previous.clone());
        let next = Arc::new(self.inner.middleware.read().apply(candidate));
        self.inner.core.lock().state = next.clone();

        self.after_commit("set", Some(path), &next, &previous)
    }

    /// `set_deep` with an updater closure.
    pub fn set_deep_with<F>(&self, path: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<&Value>) -> Value + Send + 'static,
    {
        self.set_deep(path, Update::with(f))
    }

    /// `set_deep` with any serializable value.
    pub fn set_deep_value<T: Serialize>(&self, path: &str, value: T) -> Result<(), StoreError> {
        self.set_deep(path, serde_json::to_value(value)?)
    }

    /// Restore the state before the last edit. `Ok(false)` when there is
    /// nothing to undo; no listener is called in that case.
    pub fn undo(&self) -> Result<bool, StoreError> {
        let _transition = self.inner.transition.lock();
        let (next, previous) = {
            let mut core = self.inner.core.lock();
            let current = core.state.clone();
            let Some(restored) = core.history.undo(current.clone()) else {
                return Ok(false);
            };
            core.state = restored.clone();
            (restored, current)
        };
        self.after_commit("undo", None, &next, &previous)?;
        Ok(true)
    }

    /// Re-apply the last undone edit. `Ok(false)` when there is nothing to redo.
    pub fn redo(&self) -> Result<bool, StoreError> {
        let _transition = self.inner.transition.lock();
        let (next, previous) = {
            let mut core = self.inner.core.lock();
            let current = core.state.clone();
            let Some(restored) = core.history.redo(current.clone()) else {
                return Ok(false);
            };
            core.state = restored.clone();
            (restored, current)
        };
        self.after_commit("redo", None, &next, &previous)?;
        Ok(true)
    }

    /// Run `action` with the current state and a handle to this store.
    ///
    /// The action may await between reading and writing; whatever it
    /// returns, error included, is handed back unchanged. Writes it already
    /// made are not rolled back.
    pub async fn dispatch<F, Fut, E>(&self, action: F) -> Result<(), E>
    where
        F: FnOnce(Snapshot, Store) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        action(self.get_state(), self.clone()).await
    }

    // -------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------

    /// Call `listener` with `(next, previous)` after every committed
    /// transition.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Snapshot, &Snapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Call `callback` with the selection whenever it stops being shallowly
    /// equal to the last one seen.
    pub fn watch_selectors<S, F>(&self, selectors: &[S], callback: F) -> Subscription
    where
        S: AsRef<str>,
        F: Fn(&Map<String, Value>) + Send + Sync + 'static,
    {
        let selectors = Selector::parse_all(selectors);
        let last = Mutex::new(select(&self.get_state(), &selectors));
        self.subscribe(move |next, _previous| {
            let current = select(next, &selectors);
            {
                let mut last = last.lock();
                if shallow_equal(&last, &current) {
                    return;
                }
                *last = current.clone();
            }
            callback(&current);
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    // -------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------

    /// Re-read storage and merge it into the live state.
    ///
    /// Returns whether anything was found. History is left alone.
    pub async fn rehydrate(&self) -> Result<bool, StoreError> {
        let Some(persister) = &self.inner.persister else {
            return Ok(false);
        };
        let Some(persisted) = persister.load().await? else {
            self.inner.hydrated.store(true, Ordering::Release);
            return Ok(false);
        };

        self.merge_rehydrated(persisted);
        Ok(true)
    }

    /// Remove this store's storage slot. The live state is untouched.
    pub fn clear_persisted(&self) -> Result<(), StoreError> {
        match &self.inner.persister {
            Some(persister) => persister.clear(),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------

    fn merge_rehydrated(&self, persisted: Map<String, Value>) {
        let _transition = self.inner.transition.lock();
        let (next, previous) = {
            let mut core = self.inner.core.lock();
            let previous = core.state.clone();
            let mut merged = (*previous).clone();
            merge_persisted(&mut merged, persisted);
            let next = Arc::new(merged);
            core.state = next.clone();
            (next, previous)
        };
        self.inner.hydrated.store(true, Ordering::Release);
        self.log_transition("rehydrate", None, &next, &previous);
        self.notify(&next, &previous);
    }

    fn after_commit(
        &self,
        kind: &str,
        path: Option<&str>,
        next: &Snapshot,
        previous: &Snapshot,
    ) -> Result<(), StoreError> {
        self.log_transition(kind, path, next, previous);
        self.notify(next, previous);
        match &self.inner.persister {
            Some(persister) => persister.save(next),
            None => Ok(()),
        }
    }

    fn notify(&self, next: &Snapshot, previous: &Snapshot) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(next, previous);
        }
    }

    fn log_transition(&self, kind: &str, path: Option<&str>, next: &Snapshot, previous: &Snapshot) {
        if self.inner.logging {
            debug!(
                store = %self.inner.storage_name,
                kind,
                path = path.unwrap_or(""),
                previous = %previous,
                next = %next,
                "state transition"
            );
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("storage_name", &self.inner.storage_name)
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by [`Store::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    store: Weak<Inner>,
    active: AtomicBool,
}

impl Subscription {
    /// Stop receiving notifications. Safe to call repeatedly and after the
    /// store has been dropped.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
