//! API Server
//!
//! HTTP + WebSocket front end for one crash table.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ApiConfig;
use crate::engine::CrashEngine;
use crate::errors::{ConfigurationError, EngineError, EngineResult};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

pub struct ApiServer {
    config: ApiConfig,
    engine: Arc<CrashEngine>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: Arc<CrashEngine>) -> Self {
        Self { config, engine }
    }

    /// Build the application with its middleware stack
    pub fn router(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            // Tracing layer (last for complete request tracing)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> EngineResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.socket_addr()?;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::Server(format!("Failed to bind {}: {}", addr, e)))?;

        info!("🌐 Crash API listening on http://{}", addr);
        self.log_server_info();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| EngineError::Server(e.to_string()))?;

        info!("🛑 API Server stopped gracefully");
        Ok(())
    }

    fn socket_addr(&self) -> Result<SocketAddr, ConfigurationError> {
        let ip = self
            .config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "api.host".to_string(),
                value: self.config.host.clone(),
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }

    fn log_server_info(&self) {
        info!("📋 Server Configuration:");
        info!("   Game: {}", self.engine.config().betting.game_name);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("📊 Available endpoints:");
        info!("   GET  /health                  - Health check");
        info!("   POST /api/crash/bet           - Place a bet");
        info!("   POST /api/crash/cashout       - Cash out");
        info!("   GET  /api/crash/round         - Current round");
        info!("   GET  /api/crash/history       - Recent rounds");
        info!("   GET  /api/wallet/balance      - Wallet balance");
        info!("   GET  /api/wallet/transactions - Wallet history");
        info!("   GET  /ws                      - Live round feed");
        info!("   GET  /metrics                 - Prometheus metrics");
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
