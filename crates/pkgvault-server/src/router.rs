use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, put};
use axum::Router;
use pkgvault_storage::StoragePlugin;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with all registry endpoints.
///
/// Scoped packages arrive percent-encoded in one segment (`@scope%2fname`).
pub fn build_router(storage: Arc<dyn StoragePlugin>, max_body_size: usize) -> Router {
    Router::new()
        .route("/-/ping", get(handler::ping))
        .route("/-/all", get(handler::list_packages))
        .route(
            "/-/package/:package/dist-tags/:tag",
            put(handler::set_dist_tag).delete(handler::delete_dist_tag),
        )
        .route(
            "/:package",
            get(handler::get_package)
                .put(handler::create_package)
                .delete(handler::delete_package),
        )
        .route(
            "/:package/-/:filename",
            get(handler::get_tarball)
                .put(handler::put_tarball)
                .delete(handler::delete_tarball),
        )
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { storage })
}
