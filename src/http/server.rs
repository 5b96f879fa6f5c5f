//! HTTP/HTTPS server startup logic.
//!
//! Binds the listeners for an assembled pipeline. With HTTPS enabled the
//! plaintext listener stays up as well, serving the same pipeline behind a
//! marker extension so the enforcement stage can redirect it; certificate
//! material comes from the ACME collaborator or a certificate provider.
//!
//! This function blocks until the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Extension, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use futures::StreamExt;
use rustls_acme::caches::DirCache;
use rustls_acme::AcmeConfig;

use crate::config::ServerConfig;
use crate::pipeline::Pipeline;
use crate::tls::{self, CertificateProvider, CertificateSource, ProviderCertResolver};

use super::redirect::PlainHttp;
use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Start the listeners for the assembled pipeline.
pub async fn start_server(
    pipeline: Pipeline,
    config: Arc<ServerConfig>,
    certificates: Option<CertificateSource>,
) -> Result<(), ServerError> {
    let router = pipeline.router();
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.http_port));

    if !config.http.https_enabled {
        tracing::warn!(
            "TLS disabled - server running on plain HTTP (not recommended for production)"
        );
        let handle = Handle::new();
        shutdown::setup_shutdown_handler(vec![handle.clone()]);
        tracing::info!(%http_addr, "Starting HTTP server (no TLS)");
        return axum_server::bind(http_addr)
            .handle(handle)
            .serve(router.into_make_service())
            .await
            .map_err(|e| ServerError::Server(e.to_string()));
    }

    let certificates = certificates.ok_or_else(|| {
        ServerError::TlsConfig("HTTPS enabled without a certificate source".to_string())
    })?;
    let https_addr = SocketAddr::from(([0, 0, 0, 0], config.http.https_port));
    let http_handle = Handle::new();
    let https_handle = Handle::new();
    shutdown::setup_shutdown_handler(vec![http_handle.clone(), https_handle.clone()]);

    spawn_plaintext_listener(router.clone(), http_addr, http_handle);

    match certificates {
        CertificateSource::Acme => {
            start_acme_server(router, https_addr, &config, https_handle).await
        }
        CertificateSource::Manual(provider) => {
            shutdown::setup_reload_handler(provider.clone());
            start_provider_server(router, https_addr, provider, https_handle).await
        }
        CertificateSource::Provider(provider) => {
            start_provider_server(router, https_addr, provider, https_handle).await
        }
    }
}

/// Serve the pipeline over plaintext, marked so the HTTPS enforcement stage
/// redirects everything except ACME challenge paths.
fn spawn_plaintext_listener(router: Router, addr: SocketAddr, handle: Handle) {
    tokio::spawn(async move {
        tracing::info!(%addr, "Starting HTTP listener (redirect + ACME challenges)");

        let app = router.layer(Extension(PlainHttp));
        match axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
        {
            Ok(()) => {
                tracing::debug!("HTTP listener stopped");
            }
            Err(e) => {
                tracing::error!(error = %e, "HTTP listener failed");
            }
        }
    });
}

/// Start the HTTPS listener with automatic ACME (Let's Encrypt) certificates.
async fn start_acme_server(
    router: Router,
    addr: SocketAddr,
    config: &ServerConfig,
    handle: Handle,
) -> Result<(), ServerError> {
    let domains = config.http.all_domains();
    let email = &config.http.csr_info.email;
    let cache_dir = config.http.tls.acme_cache_dir.clone();
    let production = config.http.tls.acme_production;

    let env_name = if production { "production" } else { "staging" };
    tracing::info!(
        %addr,
        domains = ?domains,
        email = %email,
        cache = %cache_dir,
        environment = %env_name,
        "Starting HTTPS server (ACME)"
    );

    if !production {
        tracing::warn!(
            "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers. \
             Set acme_production = true for production use."
        );
    }

    std::fs::create_dir_all(&cache_dir).map_err(|e| {
        ServerError::TlsConfig(format!(
            "Failed to create ACME cache directory '{}': {}",
            cache_dir, e
        ))
    })?;

    let mut acme_state = AcmeConfig::new(domains)
        .contact_push(format!("mailto:{}", email))
        .cache(DirCache::new(cache_dir))
        .directory_lets_encrypt(production)
        .state();

    // The ACME state's resolver performs per-handshake certificate selection;
    // the policy config pins protocol versions and cipher suites around it.
    let mut rustls_config = tls::server_config(acme_state.resolver())
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?;
    rustls_config
        .alpn_protocols
        .push(rustls_acme::acme::ACME_TLS_ALPN_NAME.to_vec());
    let acceptor = acme_state.axum_acceptor(Arc::new(rustls_config));

    // Renewal event loop; the resolver always answers with the last
    // known-good certificate while this makes progress.
    tokio::spawn(async move {
        loop {
            match acme_state.next().await {
                Some(Ok(event)) => {
                    tracing::info!(event = ?event, "ACME event");
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "ACME error");
                }
                None => {
                    tracing::debug!("ACME state stream ended");
                    break;
                }
            }
        }
    });

    axum_server::bind(addr)
        .handle(handle)
        .acceptor(acceptor)
        .serve(router.into_make_service())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))
}

/// Start the HTTPS listener over a certificate provider.
async fn start_provider_server(
    router: Router,
    addr: SocketAddr,
    provider: Arc<dyn CertificateProvider>,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(%addr, provider = ?provider, "Starting HTTPS server (certificate provider)");

    let resolver = Arc::new(ProviderCertResolver(provider));
    let rustls_config =
        tls::server_config(resolver).map_err(|e| ServerError::TlsConfig(e.to_string()))?;

    axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(rustls_config)))
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))
}
