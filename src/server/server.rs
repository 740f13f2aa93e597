use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

use super::routes::health_check;

/// Binds one HTTP service and serves its router.
pub struct ApiServer {
    name: &'static str,
    router: Router,
    host: String,
    port: u16,
}

impl ApiServer {
    /// Creates a server for `router`; a `/health` route is added.
    ///
    /// # Arguments
    ///
    /// * `name` - Service name used in logs
    /// * `router` - Fully configured router with its state applied
    /// * `host` - Host address to bind to
    /// * `port` - Port number to listen on
    pub fn new(name: &'static str, router: Router, host: String, port: u16) -> Self {
        info!("Creating {} server on {}:{}", name, host, port);
        Self {
            name,
            router: router.route("/health", get(health_check)),
            host,
            port,
        }
    }

    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting {} on {}:{}", self.name, self.host, self.port);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;

        info!("{} started successfully", self.name);
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}
