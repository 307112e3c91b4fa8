//! Health server for Kubernetes liveness and readiness checks and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness check (always returns 200 if server is running)
//! - `/readyz` - Readiness check (returns 200 once rules are loaded and the webhook port is bound)
//! - `/metrics` - Prometheus metrics endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for per-review metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReviewLabels {
    pub endpoint: String,
    pub decision: String,
}

impl EncodeLabelSet for ReviewLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("endpoint", self.endpoint.as_str()).encode(encoder.encode_label())?;
        ("decision", self.decision.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for rule failure metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RuleFailureLabels {
    pub rule: String,
    pub cause: String,
    pub policy: String,
}

impl EncodeLabelSet for RuleFailureLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("rule", self.rule.as_str()).encode(encoder.encode_label())?;
        ("cause", self.cause.as_str()).encode(encoder.encode_label())?;
        ("policy", self.policy.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels keyed by endpoint only
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct EndpointLabels {
    pub endpoint: String,
}

impl EncodeLabelSet for EndpointLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("endpoint", self.endpoint.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels keyed by rule chain
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ChainLabels {
    pub chain: String,
}

impl EncodeLabelSet for ChainLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("chain", self.chain.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook server
pub struct Metrics {
    /// Reviews answered, by endpoint and decision
    pub reviews_total: Family<ReviewLabels, Counter>,
    /// Rule failures, by rule, cause, and failure policy
    pub rule_failures_total: Family<RuleFailureLabels, Counter>,
    /// End-to-end review latency
    pub review_duration_seconds: Family<EndpointLabels, Histogram>,
    /// Number of rules per chain
    pub rules_registered: Family<ChainLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reviews_total = Family::<ReviewLabels, Counter>::default();
        registry.register(
            "admission_reviews",
            "Total number of admission reviews answered",
            reviews_total.clone(),
        );

        let rule_failures_total = Family::<RuleFailureLabels, Counter>::default();
        registry.register(
            "admission_rule_failures",
            "Total number of rule timeouts and execution errors",
            rule_failures_total.clone(),
        );

        let review_duration_seconds =
            Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.0, 16))
            });
        registry.register(
            "admission_review_duration_seconds",
            "Duration of an admission review in seconds",
            review_duration_seconds.clone(),
        );

        let rules_registered = Family::<ChainLabels, Gauge>::default();
        registry.register(
            "admission_rules_registered",
            "Number of rules loaded per chain",
            rules_registered.clone(),
        );

        Self {
            reviews_total,
            rule_failures_total,
            review_duration_seconds,
            rules_registered,
            registry,
        }
    }

    /// Record one answered review
    pub fn record_review(&self, endpoint: &str, decision: &str, duration_secs: f64) {
        let labels = ReviewLabels {
            endpoint: endpoint.to_string(),
            decision: decision.to_string(),
        };
        self.reviews_total.get_or_create(&labels).inc();
        self.review_duration_seconds
            .get_or_create(&EndpointLabels {
                endpoint: endpoint.to_string(),
            })
            .observe(duration_secs);
    }

    /// Record a rule that timed out or errored
    pub fn record_rule_failure(&self, rule: &str, cause: &str, policy: &str) {
        let labels = RuleFailureLabels {
            rule: rule.to_string(),
            cause: cause.to_string(),
            policy: policy.to_string(),
        };
        self.rule_failures_total.get_or_create(&labels).inc();
    }

    /// Publish the size of a rule chain
    pub fn set_rules_registered(&self, chain: &str, count: i64) {
        let labels = ChainLabels {
            chain: chain.to_string(),
        };
        self.rules_registered.get_or_create(&labels).set(count);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether rule chains are loaded and the webhook listener is up
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness check handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check handler
///
/// Returns 503 Service Unavailable until the rules are loaded, and again
/// once shutdown begins.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
