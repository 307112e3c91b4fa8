//! admission-gate - Kubernetes admission webhook server.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads settings from the environment and rule chains from YAML
//! - Starts the health server, binds the webhook port, then reports ready
//! - Drains on SIGTERM/SIGINT

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use admission_gate::health::{HealthState, run_health_server};
use admission_gate::{Pipeline, RuleFile, Settings, WebhookListener};

/// Grace period for in-flight reviews to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("admission_gate=info".parse()?),
        )
        .json()
        .init();

    info!("Starting admission-gate");

    let settings = Settings::from_env()?;
    if settings.home_namespace.is_none() {
        warn!("POD_NAMESPACE not set");
    }

    // Rules are loaded once; a bad rule file is fatal
    let rule_file = RuleFile::load(&settings.config_path)?;
    let engine = rule_file.into_engine(settings.home_namespace.clone())?;

    // Create shared health state
    let health_state = Arc::new(HealthState::new());
    health_state
        .metrics
        .set_rules_registered("mutating", engine.mutators().len() as i64);
    health_state
        .metrics
        .set_rules_registered("validating", engine.validators().len() as i64);

    let pipeline = Pipeline::new(engine).with_health(health_state.clone());

    // Start health server immediately so liveness checks answer while starting
    let health_handle = {
        let health_state = health_state.clone();
        let port = settings.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Readiness waits for the bind; a port that cannot be bound is fatal
    let listener = if settings.tls_available() {
        info!("TLS certificates found, starting webhook server");
        WebhookListener::bind_tls(
            settings.webhook_port,
            &settings.cert_path,
            &settings.key_path,
        )
        .await?
    } else {
        warn!("Webhook certificates not found, serving plain HTTP");
        WebhookListener::bind(settings.webhook_port).await?
    };
    let webhook_addr = listener.local_addr()?;

    let webhook_handle = tokio::spawn(async move {
        if let Err(e) = listener.serve(pipeline).await {
            error!("Webhook server error: {}", e);
        }
    });

    health_state.set_ready(true).await;
    info!(addr = %webhook_addr, "Webhook listener bound, marked server as ready");

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing reviews here
            health_state.set_ready(false).await;
            info!("Marked server as not ready");

            info!(
                "Waiting {}s for in-flight reviews to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("admission-gate stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the server cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
