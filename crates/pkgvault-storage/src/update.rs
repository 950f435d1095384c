//! Read-modify-write pipeline for manifests.
//!
//! ```text
//! read ─▶ transform ─▶ normalize ─▶ persist ─▶ result
//!   │         │            │           │
//!   └─────────┴────────────┴───────────┴──▶ first failure short-circuits
//! ```
//!
//! The caller supplies the three middle stages. `transform` errors are
//! returned untouched; anything else a caller stage raises, panics included,
//! becomes [`StorageError::Internal`] carrying the original message. The
//! returned future is the single completion point of the whole pipeline.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use pkgvault_types::Manifest;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::PackageStorage;

/// Run the update pipeline against `storage`.
///
/// 1. Read the current manifest; `NotFound` stops here.
/// 2. `transform` produces the updated manifest; its error is returned as-is
///    and nothing is written.
/// 3. `normalize` canonicalizes the result; an error or panic becomes
///    `Internal` and nothing is written.
/// 4. `persist` receives the package name and final manifest and resolves
///    once the write is durable. Its outcome is the pipeline's outcome.
///
/// If the backend provides an update lock it is held from step 1 until
/// `persist` resolves. Once `persist` has started, the lock travels with it,
/// so dropping the returned future does not release the name early.
pub async fn run_update<S, T, N, P, F>(
    storage: &S,
    transform: T,
    normalize: N,
    persist: P,
) -> StorageResult<()>
where
    S: PackageStorage + ?Sized,
    T: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
    N: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
    P: FnOnce(String, Manifest) -> F + Send,
    F: Future<Output = StorageResult<()>> + Send + 'static,
{
    let name = storage.package_name().to_string();
    let lock = storage.lock_for_update().await;

    let current = storage.read_package().await?;
    debug!(package = %name, "update: read current manifest");

    let updated = match panic::catch_unwind(AssertUnwindSafe(|| transform(current))) {
        Ok(result) => result?,
        Err(payload) => return Err(caller_panicked(&name, "transform", payload)),
    };

    let normalized = match panic::catch_unwind(AssertUnwindSafe(|| normalize(updated))) {
        Ok(Ok(manifest)) => manifest,
        Ok(Err(e)) => {
            warn!(package = %name, error = %e, "update: normalize failed");
            return Err(StorageError::internal(e.message()));
        }
        Err(payload) => return Err(caller_panicked(&name, "normalize", payload)),
    };

    let pending = match panic::catch_unwind(AssertUnwindSafe(|| persist(name.clone(), normalized))) {
        Ok(future) => future,
        Err(payload) => return Err(caller_panicked(&name, "persist", payload)),
    };
    let persisting = tokio::spawn(async move {
        let _lock = lock;
        pending.await
    });
    match persisting.await {
        Ok(result) => {
            debug!(package = %name, ok = result.is_ok(), "update: persist finished");
            result
        }
        Err(join) if join.is_panic() => Err(caller_panicked(&name, "persist", join.into_panic())),
        Err(join) => Err(StorageError::internal(join.to_string())),
    }
}

/// Extension giving every [`PackageStorage`] the update pipeline as a method.
pub trait PackageStorageExt: PackageStorage {
    /// See [`run_update`].
    fn update_package<T, N, P, F>(
        &self,
        transform: T,
        normalize: N,
        persist: P,
    ) -> impl Future<Output = StorageResult<()>> + Send
    where
        T: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
        N: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
        P: FnOnce(String, Manifest) -> F + Send,
        F: Future<Output = StorageResult<()>> + Send + 'static;
}

impl<S: PackageStorage + ?Sized> PackageStorageExt for S {
    fn update_package<T, N, P, F>(
        &self,
        transform: T,
        normalize: N,
        persist: P,
    ) -> impl Future<Output = StorageResult<()>> + Send
    where
        T: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
        N: FnOnce(Manifest) -> StorageResult<Manifest> + Send,
        P: FnOnce(String, Manifest) -> F + Send,
        F: Future<Output = StorageResult<()>> + Send + 'static,
    {
        run_update(self, transform, normalize, persist)
    }
}

fn caller_panicked(package: &str, stage: &str, payload: Box<dyn Any + Send>) -> StorageError {
    let message = panic_message(payload.as_ref());
    warn!(package = %package, stage, error = %message, "update: caller stage panicked");
    StorageError::internal(message)
}

/// Text of a panic payload raised with a string message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "caller-supplied function panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::traits::StoragePlugin;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn example(name: &str) -> Manifest {
        let mut m = Manifest::new(name);
        m.add_version("1.0.0", json!({ "name": name, "version": "1.0.0" }));
        m.tag("latest", "1.0.0");
        m
    }

    async fn seeded(name: &str) -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage
            .package_storage(name)
            .save_package(&example(name))
            .await
            .unwrap();
        storage
    }

    /// A persist stage that saves through a fresh handle and counts calls.
    fn saving_persist(
        storage: &InMemoryStorage,
        calls: Arc<AtomicUsize>,
    ) -> impl FnOnce(String, Manifest) -> std::pin::Pin<Box<dyn Future<Output = StorageResult<()>> + Send>> + Send
    {
        let storage = storage.clone();
        move |name, manifest| {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                storage.package_storage(&name).save_package(&manifest).await
            })
        }
    }

    #[tokio::test]
    async fn transform_normalize_persist_in_order() {
        let storage = seeded("test").await;
        let handle = storage.package_storage("test");
        let calls = Arc::new(AtomicUsize::new(0));

        handle
            .update_package(
                |mut m| {
                    assert_eq!(m.name, "test");
                    m.add_version("1.1.0", json!({ "version": "1.1.0" }));
                    m.tag("latest", "1.1.0");
                    Ok(m)
                },
                |mut m| {
                    m.extra.insert("normalized".into(), json!(true));
                    Ok(m)
                },
                saving_persist(&storage, Arc::clone(&calls)),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stored = handle.read_package().await.unwrap();
        assert_eq!(stored.latest_version(), Some("1.1.0"));
        assert_eq!(stored.extra["normalized"], json!(true));
    }

    #[tokio::test]
    async fn transform_error_is_returned_verbatim_and_nothing_persists() {
        let storage = seeded("test").await;
        let handle = storage.package_storage("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let err = handle
            .update_package(
                |_| Err(StorageError::internal("some error")),
                |m| Ok(m),
                saving_persist(&storage, Arc::clone(&calls)),
            )
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::internal("some error"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transform_conflict_keeps_its_kind() {
        let storage = seeded("test").await;
        let err = storage
            .package_storage("test")
            .update_package(
                |_| Err(StorageError::package_exists()),
                |m| Ok(m),
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::package_exists());
    }

    #[tokio::test]
    async fn normalize_panic_becomes_internal_with_message() {
        let storage = seeded("test").await;
        let calls = Arc::new(AtomicUsize::new(0));

        let err = storage
            .package_storage("test")
            .update_package(
                |m| Ok(m),
                |_| panic!("error on parse the metadata"),
                saving_persist(&storage, Arc::clone(&calls)),
            )
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::internal("error on parse the metadata"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn normalize_error_is_converted_to_internal() {
        let storage = seeded("test").await;
        let err = storage
            .package_storage("test")
            .update_package(
                |m| Ok(m),
                |_| Err(StorageError::no_such_package()),
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
        assert_eq!(err.message(), crate::error::NO_SUCH_PACKAGE);
    }

    #[tokio::test]
    async fn missing_package_stops_before_transform() {
        let storage = InMemoryStorage::new();
        let transformed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&transformed);

        let err = storage
            .package_storage("ghost")
            .update_package(
                move |m| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(m)
                },
                |m| Ok(m),
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(transformed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persist_error_is_the_result() {
        let storage = seeded("test").await;
        let err = storage
            .package_storage("test")
            .update_package(
                |m| Ok(m),
                |m| Ok(m),
                |_, _| async { Err(StorageError::internal("EACCES")) },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::internal("EACCES"));
    }

    #[tokio::test]
    async fn persist_receives_package_name() {
        let storage = seeded("@scope/pkg").await;
        storage
            .package_storage("@scope/pkg")
            .update_package(
                |m| Ok(m),
                |m| Ok(m),
                |name, m| async move {
                    assert_eq!(name, "@scope/pkg");
                    assert_eq!(m.name, "@scope/pkg");
                    Ok(())
                },
            )
            .await
            .unwrap();
    }

    async fn exploding_persist(_name: String, _manifest: Manifest) -> StorageResult<()> {
        panic!("persist exploded")
    }

    #[tokio::test]
    async fn panic_inside_persist_future_is_caught() {
        let storage = seeded("test").await;
        let err = storage
            .package_storage("test")
            .update_package(
                |m| Ok(m),
                |m| Ok(m),
                exploding_persist,
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::internal("persist exploded"));
    }

    #[tokio::test]
    async fn transform_panic_with_formatted_message() {
        let storage = seeded("test").await;
        let err = storage
            .package_storage("test")
            .update_package(
                |m| -> StorageResult<Manifest> { panic!("bad manifest {}", m.name) },
                |m| Ok(m),
                |_, _| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::internal("bad manifest test"));
    }

    #[test]
    fn panic_message_fallback() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "caller-supplied function panicked");
    }
}
