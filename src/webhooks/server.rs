//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks:
//! - `POST /mutate` - mutator chain only (MutatingWebhookConfiguration)
//! - `POST /validate` - validator chain only (ValidatingWebhookConfiguration)
//! - `POST /review` - both chains, validators seeing the mutated object
//!
//! To enable TLS, mount the certificate secret at /etc/webhook/certs/. Without
//! certificates the server falls back to plain HTTP for local development.
//!
//! When a client disconnects mid-review the handler future is dropped, which
//! cancels the in-flight rule and discards the working copy.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::admission::invalid_review;
use crate::pipeline::{ChainSelection, Pipeline, PipelineError};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub pipeline: Pipeline,
}

impl WebhookState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/validate", post(validate))
        .route("/review", post(review))
        .with_state(state)
}

async fn mutate(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    handle(&state, &body, ChainSelection::Mutating).await
}

async fn validate(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    handle(&state, &body, ChainSelection::Validating).await
}

async fn review(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    handle(&state, &body, ChainSelection::Full).await
}

/// Run one review and encode the answer.
///
/// Any JSON body gets a 200 with a review response, even when the review
/// itself is malformed; only a non-JSON body is a 400.
async fn handle(state: &WebhookState, body: &[u8], selection: ChainSelection) -> Response {
    let endpoint = selection.endpoint();
    let decision = match state.pipeline.review(body, selection).await {
        Ok(decision) => decision,
        Err(PipelineError::InvalidBody(e)) => {
            warn!(endpoint, error = %e, "Rejecting unreadable admission review");
            return (
                StatusCode::BAD_REQUEST,
                Json(invalid_review(format!("Invalid AdmissionReview: {e}"))),
            )
                .into_response();
        }
        Err(e @ PipelineError::Cancelled) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(invalid_review(e.to_string())),
            )
                .into_response();
        }
    };

    debug!(
        endpoint,
        uid = %decision.response.uid,
        stage = %decision.stage(),
        "Review decided"
    );

    let uid = decision.response.uid.clone();
    match decision.response.into_review(&decision.api_version) {
        Ok(review) => (StatusCode::OK, Json(review)).into_response(),
        Err(e) => {
            error!(endpoint, uid = %uid, error = %e, "Failed to encode admission response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(invalid_review(format!("failed to encode response: {e}"))),
            )
                .into_response()
        }
    }
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// The port could not be bound
    #[error("Failed to bind webhook port: {0}")]
    Bind(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// A bound webhook socket, with TLS settings when certificates are mounted.
///
/// Binding is split from serving so readiness is only reported once the
/// port is actually accepting connections.
pub struct WebhookListener {
    listener: tokio::net::TcpListener,
    tls: Option<axum_server::tls_rustls::RustlsConfig>,
}

impl WebhookListener {
    /// Bind plain HTTP on `0.0.0.0:<port>`. The API server refuses
    /// plain-HTTP webhooks, so this is for local development and tests only.
    pub async fn bind(port: u16) -> Result<Self, WebhookError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WebhookError::Bind(e.to_string()))?;
        Ok(Self {
            listener,
            tls: None,
        })
    }

    /// Bind on `0.0.0.0:<port>` and load the PEM certificate and key
    ///
    /// # Arguments
    /// * `cert_path` - Path to TLS certificate file (PEM format)
    /// * `key_path` - Path to TLS private key file (PEM format)
    pub async fn bind_tls(port: u16, cert_path: &Path, key_path: &Path) -> Result<Self, WebhookError> {
        use axum_server::tls_rustls::RustlsConfig;

        let config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;
        let mut bound = Self::bind(port).await?;
        bound.tls = Some(config);
        Ok(bound)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WebhookError> {
        self.listener
            .local_addr()
            .map_err(|e| WebhookError::Bind(e.to_string()))
    }

    /// Serve reviews until the server stops
    ///
    /// # Arguments
    /// * `pipeline` - Decision pipeline shared by every request
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), WebhookError> {
        let app = create_webhook_router(Arc::new(WebhookState::new(pipeline)));
        let addr = self.local_addr()?;

        match self.tls {
            Some(config) => {
                info!(%addr, "Webhook server listening with TLS");
                let listener = self
                    .listener
                    .into_std()
                    .map_err(|e| WebhookError::Server(e.to_string()))?;
                axum_server::from_tcp_rustls(listener, config)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| WebhookError::Server(e.to_string()))?;
            }
            None => {
                warn!(%addr, "Webhook server listening without TLS");
                axum::serve(self.listener, app)
                    .await
                    .map_err(|e| WebhookError::Server(e.to_string()))?;
            }
        }

        Ok(())
    }
}
