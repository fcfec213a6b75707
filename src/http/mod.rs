//! HTTP transport.
//!
//! | Route | Method | Handler |
//! |-------|--------|---------|
//! | `/` | GET | Liveness check |
//! | `/detect_emotion` | POST | Multipart upload, field `file` or the first file part |
//! | `/save_session` | POST | Form fields `name`, `emotion`, `stress_score` |
//! | `/get_sessions` | GET | Saved sessions in insertion order |
//! | `/chat` | POST | Wellness chat |
//!
//! Every route allows cross-origin requests from any origin with credentials.

mod handlers;

pub use handlers::{InBand, LIVENESS_MESSAGE, UPLOAD_FIELD};

use crate::config::{DEFAULT_MAX_UPLOAD_BYTES, MoodscanConfig};
use crate::detection::EmotionDetector;
use crate::observability::REQUEST_ID_HEADER;
use crate::sessions::SessionRegister;
use crate::wellness::WellnessResponder;
use crate::{Error, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, header};
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Detection pipeline.
    pub detector: Arc<EmotionDetector>,
    /// Saved sessions.
    pub sessions: SessionRegister,
    /// Chat responder.
    pub responder: WellnessResponder,
}

impl AppState {
    /// Creates state with an empty session register.
    #[must_use]
    pub fn new(detector: EmotionDetector) -> Self {
        Self {
            detector: Arc::new(detector),
            sessions: SessionRegister::new(),
            responder: WellnessResponder::new(),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/detect_emotion", post(handlers::detect_emotion))
        .route("/save_session", post(handlers::save_session))
        .route("/get_sessions", get(handlers::get_sessions))
        .route("/chat", post(handlers::chat))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(axum::middleware::from_fn(handlers::propagate_request_id))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// HTTP server for moodscan.
pub struct HttpServer {
    host: String,
    port: u16,
    max_upload_bytes: usize,
    state: AppState,
}

impl HttpServer {
    /// Creates a server on `0.0.0.0:8000`.
    #[must_use]
    pub fn new(detector: EmotionDetector) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            state: AppState::new(detector),
        }
    }

    /// Creates a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the detector cannot be built.
    pub fn from_config(config: &MoodscanConfig) -> Result<Self> {
        let detector = EmotionDetector::from_config(config)?;
        Ok(Self::new(detector)
            .with_host(config.server.host.clone())
            .with_port(config.server.port)
            .with_max_upload_bytes(config.server.max_upload_bytes))
    }

    /// Sets the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the request body limit.
    #[must_use]
    pub const fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Shared handler state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Builds the router without binding.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone(), self.max_upload_bytes)
    }

    /// Binds and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or serving fails.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "bind".to_string(),
                cause: format!("{}:{}: {e}", self.host, self.port),
            })?;
        let addr = listener.local_addr().map_err(|e| Error::OperationFailed {
            operation: "local_addr".to_string(),
            cause: e.to_string(),
        })?;

        tracing::info!(
            %addr,
            timeout_secs = self.state.detector.timeout().as_secs(),
            workers = self.state.detector.executor().workers(),
            "Starting moodscan HTTP server"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "serve".to_string(),
                cause: e.to_string(),
            })?;

        let detector = Arc::clone(&self.state.detector);
        if let Err(e) = tokio::task::spawn_blocking(move || detector.shutdown()).await {
            tracing::warn!(error = %e, "Detector shutdown did not complete");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::classifier::UnconfiguredClassifier;
    use crate::executor::{ExecutorConfig, OffloadExecutor};

    fn detector() -> EmotionDetector {
        EmotionDetector::new(
            Arc::new(UnconfiguredClassifier),
            ArtifactStore::default(),
            OffloadExecutor::new(ExecutorConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_server_builder() {
        let server = HttpServer::new(detector())
            .with_host("127.0.0.1")
            .with_port(9000)
            .with_max_upload_bytes(1024);
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 9000);
        assert_eq!(server.max_upload_bytes, 1024);
        assert!(server.state().sessions.is_empty());
    }
}
