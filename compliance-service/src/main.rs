//! Compliance Service entry point.

use compliance_service::config::{ComplianceConfig, SERVICE_NAME};
use compliance_service::services::init_metrics;
use compliance_service::startup::ComplianceCore;

use service_core::observability::init_tracing;
use tokio::signal;

/// Resolves on SIGHUP. Never resolves on other platforms.
async fn reload_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(mut hangup) => {
                hangup.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot install SIGHUP handler, reload disabled");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = ComplianceConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(SERVICE_NAME, &config.common.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.common.environment,
        "Starting compliance-service"
    );

    init_metrics();

    // Log configuration (mask sensitive values)
    tracing::info!(
        company_tax_id = %config.company.tax_id,
        keystore_path = %config.keystore.path.display(),
        keystore_type = config.keystore.keystore_type.as_str(),
        certificate_alias = %config.keystore.certificate_alias,
        test_mode = config.gateway.test_mode,
        endpoint = %config.gateway.endpoint,
        mandatory_from = %config.registration.mandatory_from,
        "Configuration loaded"
    );

    let core = ComplianceCore::build(&config).map_err(|e| {
        tracing::error!(error = %e, "Failed to build compliance core");
        std::io::Error::other(format!("Startup error: {}", e))
    })?;
    core.log_inventory();

    tracing::info!(
        mode = %core.orchestrator.gateway().mode(),
        "Compliance core ready, send SIGHUP to reload certificates"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = reload_signal() => {
                // A failed reload keeps serving the previous certificates.
                if core.certificates.reload().is_ok() {
                    core.log_inventory();
                }
            }
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
