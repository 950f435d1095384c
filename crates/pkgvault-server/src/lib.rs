//! HTTP registry server for pkgvault.
//!
//! Serves manifests and tarballs from any [`pkgvault_storage::StoragePlugin`]
//! and maps storage failures onto HTTP statuses.

pub mod config;
pub mod error;
pub mod handler;
pub mod listen;
pub mod router;
pub mod server;

pub use config::{ListenSetting, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use listen::{list_listen_addresses, parse_address, ListenAddress, Protocol};
pub use router::build_router;
pub use server::PkgvaultServer;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use pkgvault_storage::{InMemoryStorage, LocalConfig, LocalStorage, StoragePlugin};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    const LIMIT: usize = 1024 * 1024;

    fn app() -> Router {
        build_router(Arc::new(InMemoryStorage::new()), LIMIT)
    }

    fn manifest(name: &str) -> Value {
        json!({
            "name": name,
            "versions": { "1.0.0": { "name": name, "version": "1.0.0" } },
            "dist-tags": { "latest": "1.0.0" },
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn json_body(value: &Value) -> Body {
        Body::from(serde_json::to_vec(value).unwrap())
    }

    #[tokio::test]
    async fn ping_endpoint() {
        let (status, body) = send(&app(), Method::GET, "/-/ping", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn publish_then_fetch() {
        let app = app();
        let (status, _) = send(&app, Method::PUT, "/left-pad", json_body(&manifest("left-pad"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, Method::GET, "/left-pad", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let got: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(got, manifest("left-pad"));

        let (status, body) = send(&app, Method::GET, "/-/all", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Vec<String>>(&body).unwrap(), vec!["left-pad"]);
    }

    #[tokio::test]
    async fn second_publish_conflicts() {
        let app = app();
        send(&app, Method::PUT, "/dup", json_body(&manifest("dup"))).await;
        let (status, body) = send(&app, Method::PUT, "/dup", json_body(&manifest("dup"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "this package is already present");
    }

    #[tokio::test]
    async fn missing_package_is_404() {
        let (status, body) = send(&app(), Method::GET, "/ghost", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "no such package available");
    }

    #[tokio::test]
    async fn mismatched_name_is_400() {
        let (status, _) = send(&app(), Method::PUT, "/a", json_body(&manifest("b"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scoped_package_round() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::PUT,
            "/@scope%2fpkg",
            json_body(&manifest("@scope/pkg")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, Method::GET, "/@scope%2fpkg", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_package_then_404() {
        let app = app();
        send(&app, Method::PUT, "/gone", json_body(&manifest("gone"))).await;
        let (status, _) = send(&app, Method::DELETE, "/gone", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, "/gone", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, Method::GET, "/-/all", Body::empty()).await;
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn delete_on_local_backend_clears_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(LocalConfig {
            root: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        let app = build_router(Arc::new(storage), LIMIT);

        send(&app, Method::PUT, "/gone", json_body(&manifest("gone"))).await;
        let (status, _) = send(&app, Method::DELETE, "/gone", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, Method::GET, "/-/all", Body::empty()).await;
        assert_eq!(body, b"[]");
        let (status, _) = send(&app, Method::DELETE, "/gone", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tarball_upload_download_conflict() {
        let app = app();
        let uri = "/pkg/-/pkg-1.0.0.tgz";
        let (status, _) = send(&app, Method::GET, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::PUT, uri, Body::from("tarball-bytes")).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, Method::GET, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"tarball-bytes");

        let (status, body) = send(&app, Method::PUT, uri, Body::from("other")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "file already exists");

        let (status, _) = send(&app, Method::DELETE, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = build_router(Arc::new(InMemoryStorage::new()), 8);
        let (status, _) = send(&app, Method::PUT, "/pkg/-/pkg.tgz", Body::from("0123456789")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn dist_tags_go_through_update_pipeline() {
        let app = app();
        let mut m = manifest("tagged");
        m["versions"]["2.0.0"] = json!({ "version": "2.0.0" });
        send(&app, Method::PUT, "/tagged", json_body(&m)).await;

        let (status, _) = send(
            &app,
            Method::PUT,
            "/-/package/tagged/dist-tags/next",
            json_body(&json!("2.0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/tagged", Body::empty()).await;
        let got: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(got["dist-tags"]["next"], "2.0.0");

        let (status, _) = send(
            &app,
            Method::PUT,
            "/-/package/tagged/dist-tags/next",
            json_body(&json!("9.9.9")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::DELETE, "/-/package/tagged/dist-tags/next", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::DELETE, "/-/package/tagged/dist-tags/next", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn local_backend_behind_router() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(LocalConfig {
            root: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        let storage: Arc<dyn StoragePlugin> = Arc::new(storage);
        let app = build_router(storage, LIMIT);

        send(&app, Method::PUT, "/disk", json_body(&manifest("disk"))).await;
        let (status, _) = send(&app, Method::PUT, "/disk/-/disk-1.0.0.tgz", Body::from("abc")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(dir.path().join("disk").join("disk-1.0.0.tgz").is_file());
        assert!(dir.path().join("disk").join("package.json").is_file());
    }
}
