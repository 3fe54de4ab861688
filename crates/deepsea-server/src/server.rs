use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::AppConfig,
    handlers::{self, AppState},
    runtime::Runtime,
    websocket,
};

pub struct DeepseaServer {
    addr: SocketAddr,
    app: Router,
    runtime: Runtime,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(|req: &axum::http::Request<_>| {
            use tracing::field::Empty;
            tracing::info_span!(
                "http.request",
                http.method = %req.method(),
                http.target = %req.uri(),
                http.status_code = Empty,
            )
        })
        .on_response(
            |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                tracing::debug!(
                    http.status = %res.status().as_u16(),
                    elapsed_ms = %latency.as_millis(),
                    "request handled"
                );
            },
        );

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api", get(handlers::overview))
        .route("/api/modules", get(handlers::list_modules))
        .route(
            "/api/modules/{name}",
            get(handlers::get_module)
                .put(handlers::put_module)
                .delete(handlers::delete_module),
        )
        .route("/api/devices", get(handlers::list_devices))
        .route(
            "/api/devices/{name}",
            get(handlers::get_device)
                .put(handlers::put_device)
                .delete(handlers::delete_device),
        )
        .route(
            "/api/devices/{device}/inputs/{value}",
            get(handlers::get_input).put(handlers::put_input),
        )
        .route(
            "/api/devices/{device}/outputs/{value}",
            get(handlers::get_output).put(handlers::put_output),
        )
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(trace)
                .layer(CorsLayer::permissive())
                .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes)),
        )
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Start the control plane and assemble the router. Must be called inside
    /// a tokio runtime.
    pub fn build(self) -> DeepseaServer {
        let runtime = Runtime::start(&self.config);
        let state = AppState {
            registry: runtime.registry(),
            backend: runtime.backend(),
            ping_interval: self.config.events.ping_interval(),
        };
        let app = build_app(state, &self.config);

        DeepseaServer {
            addr: self.addr,
            app,
            runtime,
        }
    }
}

impl DeepseaServer {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Serve until Ctrl+C or until the control plane halts, then stop the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot bind, serving fails, or a controller hit a
    /// fatal error.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal(self.runtime.shutdown_sender()))
            .await;

        let stopped = self.runtime.shutdown().await;
        served?;
        stopped
    }
}

/// Resolves on Ctrl+C or once the control plane stops on its own.
///
/// Ctrl+C also stops the control plane, which closes every event stream so
/// open websocket connections do not hold up the graceful shutdown.
async fn shutdown_signal(shutdown: Arc<watch::Sender<bool>>) {
    let mut halted = shutdown.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.send_replace(true);
        }
        _ = halted.wait_for(|stopped| *stopped) => {
            tracing::warn!("control plane stopped, shutting down server");
        }
    }
}
