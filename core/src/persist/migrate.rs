//! Version negotiation for persisted state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{BoxError, StoreError};

/// Version assumed when none is configured.
pub const DEFAULT_VERSION: u32 = 1;

/// Version assumed for a stored record that carries none.
pub const UNVERSIONED: u32 = 0;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async upgrade hook: `(persisted_state, stored_version) -> migrated_state`.
pub type MigrateFn =
    Arc<dyn Fn(Value, u32) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Box an async closure as a [`MigrateFn`].
pub fn migrate_fn<F, Fut>(f: F) -> MigrateFn
where
    F: Fn(Value, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(
        move |state: Value, version: u32| -> BoxFuture<'static, Result<Value, BoxError>> {
            Box::pin(f(state, version))
        },
    )
}

/// The default hook: hands the state back untouched.
pub fn identity() -> MigrateFn {
    migrate_fn(|state, _version| async move { Ok::<Value, BoxError>(state) })
}

/// Run `migrate` for a record stored under `from`, targeting `to`.
///
/// A rejected migration becomes `StoreError::Migration`.
pub async fn run_migration(
    migrate: &MigrateFn,
    state: Value,
    from: u32,
    to: u32,
) -> Result<Value, StoreError> {
    info!(from, to, "migrating persisted state");
    match migrate(state, from).await {
        Ok(migrated) => Ok(migrated),
        Err(source) => {
            warn!(from, to, error = %source, "migration rejected");
            Err(StoreError::Migration { from, to, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn identity_returns_state_unchanged() {
        let out = run_migration(&identity(), json!({"counter": 10}), 0, 1)
            .await
            .unwrap();
        assert_eq!(out, json!({"counter": 10}));
    }

    #[tokio::test]
    async fn migration_sees_stored_version() {
        let migrate = migrate_fn(|mut state, version| async move {
            if version < 2 {
                state["migrated"] = json!(true);
            }
            Ok::<Value, BoxError>(state)
        });
        let out = run_migration(&migrate, json!({"counter": 10}), 1, 2).await.unwrap();
        assert_eq!(out, json!({"counter": 10, "migrated": true}));

        let untouched = run_migration(&migrate, json!({"counter": 10}), 2, 3).await.unwrap();
        assert_eq!(untouched, json!({"counter": 10}));
    }

    #[tokio::test]
    async fn rejection_becomes_migration_error() {
        let migrate = migrate_fn(|_state, _version| async move {
            Err::<Value, BoxError>("Migration failed".into())
        });
        let err = run_migration(&migrate, json!({}), 1, 2).await.unwrap_err();
        match err {
            StoreError::Migration { from, to, source } => {
                assert_eq!((from, to), (1, 2));
                assert_eq!(source.to_string(), "Migration failed");
            }
            other => panic!("expected Migration, got {:?}", other),
        }
    }
}
