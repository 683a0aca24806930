/// HTTP server setup and configuration
use crate::api::handlers::RpcHandler;
use crate::api::protocol::{RpcNotification, RpcResponse};
use anyhow::{Context, Result};
use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use collective_config::ServerConfig;
use collective_core::{Collective, HealthSummary};
use futures::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ApiConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serves a collective over HTTP.
pub struct ApiServer {
    config: ApiConfig,
    handler: RpcHandler,
}

impl ApiServer {
    pub fn new(config: ApiConfig, collective: Collective) -> Self {
        Self {
            config,
            handler: RpcHandler::new(collective),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/rpc", post(rpc))
            .route("/events", get(events))
            .route("/health", get(health))
            .with_state(self.handler.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown_signal` resolves, then drain open connections.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        let bind_addr: SocketAddr = self
            .config
            .bind_address()
            .parse()
            .context("Invalid bind address")?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;

        tracing::info!(
            instance_id = %self.handler.collective().instance_id(),
            "Starting HTTP server on {}",
            bind_addr
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .context("Server error")?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn rpc(State(handler): State<RpcHandler>, body: String) -> Json<RpcResponse> {
    Json(handler.handle_raw(&body).await)
}

async fn health(State(handler): State<RpcHandler>) -> Json<HealthSummary> {
    Json(handler.collective().health().await)
}

/// Stream collective events as notifications.
async fn events(
    State(handler): State<RpcHandler>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut receiver = handler.collective().subscribe();

    let stream = stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let notification = RpcNotification::from(&event);
                    match Event::default()
                        .event(notification.method.clone())
                        .json_data(&notification)
                    {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(e) => tracing::warn!("Failed to encode notification: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use collective_config::CollectiveConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn server() -> ApiServer {
        let collective = Collective::new(CollectiveConfig::default()).unwrap();
        ApiServer::new(ApiConfig::default(), collective)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_api_config_default() {
        let config = ApiConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_api_config_builder() {
        let config = ApiConfig::new()
            .with_host("0.0.0.0")
            .with_port(8080)
            .with_cors(false);

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(!config.enable_cors);
    }

    #[test]
    fn test_bind_address() {
        let config = ApiConfig::new().with_host("localhost").with_port(5000);

        assert_eq!(config.bind_address(), "localhost:5000");
    }

    #[tokio::test]
    async fn test_rpc_route() {
        let request = Request::post("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc": "2.0", "id": 1, "method": "swarm/agents/list"}"#,
            ))
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"jsonrpc": "2.0", "id": 1, "result": {"agents": []}})
        );
    }

    #[tokio::test]
    async fn test_rpc_route_reports_parse_errors_in_body() {
        let request = Request::post("/rpc").body(Body::from("nope")).unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_health_route() {
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total_agents"], 0);
        assert_eq!(body["emergency_protocols_active"], false);
    }
}
