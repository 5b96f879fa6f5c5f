//! Graceful shutdown and signal handling.
//!
//! Handles:
//! - SIGTERM/SIGINT: Graceful shutdown with connection draining on every
//!   listener
//! - SIGHUP: Certificate reload (manual TLS mode only)

use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;

use crate::config::SHUTDOWN_GRACE_SECS;
use crate::tls::StaticCertificateProvider;

/// Setup graceful shutdown on SIGTERM and SIGINT.
///
/// When either signal is received, every listener will:
/// 1. Stop accepting new connections
/// 2. Wait for existing connections to complete
/// 3. Shutdown gracefully
pub fn setup_shutdown_handler(handles: Vec<Handle>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        for handle in &handles {
            handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
        }
        tracing::info!(
            grace_secs = SHUTDOWN_GRACE_SECS,
            "Graceful shutdown initiated, waiting for connections to close"
        );
    });
}

/// Setup SIGHUP handler for certificate reload (manual TLS mode).
///
/// When SIGHUP is received, the certificate provider re-reads its PEM files
/// and swaps the handle; in-flight handshakes keep the previous one.
#[cfg(unix)]
pub fn setup_reload_handler(provider: Arc<StaticCertificateProvider>) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(signal) => signal,
            Err(error) => {
                tracing::error!(error = %error, "Failed to install SIGHUP handler");
                return;
            }
        };

        loop {
            sighup.recv().await;
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match provider.reload() {
                Ok(()) => {
                    tracing::info!("TLS certificates reloaded successfully");
                }
                Err(error) => {
                    tracing::error!(error = %error, "Failed to reload TLS certificates");
                }
            }
        }
    });
}

/// No-op reload handler for non-Unix platforms.
#[cfg(not(unix))]
pub fn setup_reload_handler(_provider: Arc<StaticCertificateProvider>) {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
}
