//! JSON chat service
//!
//! Exposes the orchestrator over HTTP using the same contract the delegated
//! backend client speaks:
//! - `GET /healthz` returns `{"status": "ok"}`
//! - `POST /chat` takes `{messages, useSearch}` and returns
//!   `{reply, usedSearch, model, latencyMs, citations}`

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::chat::{ChatRequest, ChatResponse, last_user_message};
use crate::config::ServerConfig;
use crate::error::{ParleyError, Result};
use crate::orchestrator::Orchestrator;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Reply pipeline; never delegates to another backend
    pub orchestrator: Orchestrator,
    /// Listener, CORS and timeout settings
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        Self {
            orchestrator: orchestrator.without_delegation(),
            config,
        }
    }
}

/// The chat HTTP server
pub struct ChatServer {
    state: Arc<AppState>,
}

impl ChatServer {
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(orchestrator, config)),
        }
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .listen_addr
            .parse()
            .map_err(|e| ParleyError::Config(format!("Invalid listen address: {e}")))?;

        let app = create_router(Arc::clone(&self.state));

        tracing::info!("Starting chat server on {addr}");
        tracing::info!(
            "Provider: {} (search {})",
            self.state.orchestrator.provider_kind(),
            if self.state.orchestrator.config().search.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        tracing::info!("CORS origins: {:?}", self.state.config.allowed_origins);

        let request_timeout = Duration::from_secs(self.state.config.request_timeout_secs);
        let worst_case = self.state.orchestrator.config().worst_case_reply_time();
        if request_timeout < worst_case {
            tracing::warn!(
                "server.request_timeout_secs ({:?}) is shorter than the slowest retried reply ({:?}); \
                 slow failures will end in a bare timeout instead of a 502",
                request_timeout,
                worst_case
            );
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ParleyError::Network(format!("Failed to bind to {addr}: {e}"))
        })?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ParleyError::Network(format!("Server error: {e}")))?;

        tracing::info!("Chat server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes and middleware configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Ignoring invalid CORS origin '{origin}': {e}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("chat", %request_id);

    let mut response = async move {
        let Json(request) = match payload {
            Ok(body) => body,
            Err(rejection) => {
                tracing::warn!("Rejected chat request body: {rejection}");
                return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
            }
        };

        if request.messages.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "messages must not be empty");
        }
        if last_user_message(&request.messages).is_none() {
            return error_response(
                StatusCode::BAD_REQUEST,
                "at least one user message is required",
            );
        }

        tracing::debug!(
            messages = request.messages.len(),
            use_search = request.use_search,
            "Handling chat request"
        );

        match state
            .orchestrator
            .generate_reply(&request.messages, request.use_search)
            .await
        {
            Ok(reply) => Json(ChatResponse::from(reply)).into_response(),
            Err(e) => {
                tracing::error!("Chat request failed: {e}");
                error_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::providers::ProviderRegistry;
    use crate::search::SearchAugmenter;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = Config::default();
        let orchestrator = Orchestrator::new(
            Arc::new(config.clone()),
            ProviderRegistry::new(),
            SearchAugmenter::disabled(),
            None,
        );
        Arc::new(AppState::new(orchestrator, config.server))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_without_provider_is_bad_gateway() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[test]
    fn test_cors_layer_accepts_wildcard_and_skips_invalid() {
        // Construction must not panic on either form.
        let _ = cors_layer(&["*".to_string()]);
        let _ = cors_layer(&["http://localhost:3000".to_string(), "bad\norigin".to_string()]);
    }
}
