use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::listen::{list_listen_addresses, ListenAddress, Protocol};
use crate::router::build_router;

/// pkgvault registry server.
pub struct PkgvaultServer {
    config: ServerConfig,
}

impl PkgvaultServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the storage backend and the router over it (useful for testing).
    pub async fn router(&self) -> ServerResult<axum::Router> {
        let storage = self.config.storage.build().await?;
        Ok(build_router(storage, self.config.max_body_size))
    }

    /// Bind every resolved listen address and serve until one listener fails.
    ///
    /// `listen` overrides the configured addresses.
    pub async fn serve(self, listen: Option<&str>) -> ServerResult<()> {
        let app = self.router().await?;
        let mut listeners = JoinSet::new();

        for address in list_listen_addresses(listen, self.config.listen.as_ref()) {
            let ListenAddress::Tcp { protocol, host, port } = &address else {
                warn!(%address, "unix socket listeners are not supported, skipping");
                continue;
            };
            if *protocol == Protocol::Https {
                warn!(%address, "TLS is not terminated here, serving plain http");
            }
            let listener = TcpListener::bind((host.as_str(), *port)).await?;
            info!(%address, "pkgvault listening");
            let app = app.clone();
            listeners.spawn(async move { axum::serve(listener, app).await });
        }

        if listeners.is_empty() {
            return Err(ServerError::Config("no usable listen address".into()));
        }
        while let Some(finished) = listeners.join_next().await {
            finished.map_err(|e| ServerError::Internal(e.to_string()))??;
        }
        Ok(())
    }
}
