//! Blobs Server - Local storage server
//!
//! A filesystem-backed implementation of the blobs protocol for offline
//! development and tests. It serves both addressing modes:
//! - direct storage paths `/{site}/{store}/{key}` (edge mode)
//! - control-plane paths `/api/v1/sites/{site}/blobs/{key}?context={store}`
//!   answering with signed URLs to the direct paths

pub mod auth;
pub mod error;
pub mod handlers;
pub mod storage;
pub mod walk;

pub use error::{Result, ServerError};
pub use handlers::AppState;
pub use storage::LocalStorage;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
};
use blobs_common::ServerConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the server router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health route first (no auth)
        .route("/health", get(handlers::health_check))
        // Control plane
        .route("/api/v1/sites/{site}/blobs", get(handlers::control_list))
        .route(
            "/api/v1/sites/{site}/blobs/{*key}",
            get(handlers::control_blob)
                .put(handlers::control_blob)
                .delete(handlers::control_blob),
        )
        // Direct storage
        .route("/{site}/{store}", get(handlers::list_blobs))
        .route("/{site}/{store}/", get(handlers::list_blobs))
        .route(
            "/{site}/{store}/{*key}",
            get(handlers::get_blob)
                .head(handlers::head_blob)
                .put(handlers::put_blob)
                .delete(handlers::delete_blob),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A bound, not yet running local server
pub struct LocalServer {
    listener: TcpListener,
    app: Router,
    local_addr: SocketAddr,
    base_url: String,
}

impl LocalServer {
    /// Bind the listen address and prepare the router
    ///
    /// Signed URLs use the configured public URL, or the bound address when
    /// none is set (so port 0 works).
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        let local_addr = listener.local_addr()?;
        let base_url = config.base_url(local_addr);

        let state = Arc::new(AppState {
            storage: LocalStorage::new(&config.directory, &config.scratch_dir),
            token: config.token,
            base_url: base_url.clone(),
        });

        Ok(Self {
            listener,
            app: router(state),
            local_addr,
            base_url,
        })
    }

    /// Address the server is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL clients should use
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Serving blobs on {}", self.local_addr);
        axum::serve(self.listener, self.app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
