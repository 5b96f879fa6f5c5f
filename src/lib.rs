//! groundwork: a bootstrap layer for HTTP(S) server applications.
//!
//! Given a declarative configuration block, this crate assembles the whole
//! request-processing pipeline (TLS termination, certificate lifecycle,
//! authentication, routing, error handling) so concrete applications only
//! supply business logic through the [`AppHooks`] trait:
//!
//! ```no_run
//! use groundwork::{AppHooks, Host, HostArgs, ServerConfig};
//! # use groundwork::{FieldError, PipelineFailure, RequestContext};
//! # use axum::http::StatusCode;
//! # use axum::response::{IntoResponse, Response};
//! use clap::Parser;
//!
//! struct MyApp;
//!
//! #[async_trait::async_trait]
//! impl AppHooks for MyApp {
//!     // register controllers, override authentication, ...
//! #   async fn on_unhandled_exception(
//! #       &self,
//! #       _failure: &PipelineFailure,
//! #       _ctx: &RequestContext,
//! #   ) -> Response {
//! #       StatusCode::INTERNAL_SERVER_ERROR.into_response()
//! #   }
//! #   async fn on_input_validation_error(
//! #       &self,
//! #       _ctx: &RequestContext,
//! #       _errors: &[FieldError],
//! #   ) -> Response {
//! #       StatusCode::BAD_REQUEST.into_response()
//! #   }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let args = HostArgs::parse();
//!     let config = ServerConfig::load(&args.config)?;
//!     groundwork::logging::init(&config.logging, args.log_level.as_deref());
//!     Host::new(config, MyApp)?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod routing;
pub mod tls;

use std::sync::Arc;

pub use config::{ConfigError, HostArgs, ServerConfig, TlsMode};
pub use error::{BoxError, HostError};
pub use hooks::{
    AppHooks, AuthOutcome, AuthResult, FieldError, PipelineFailure, Principal, RequestContext,
    ServiceMap, ValidationErrors,
};
pub use pipeline::{assemble, AssembleError, Pipeline, Session, Stage};
pub use routing::{Access, Action, ActionResult, Controller, ControllerRegistry, ResolvedRoute};
pub use tls::{CertificateProvider, CertificateSource, StaticCertificateProvider, TlsError};

/// The configured server host: validates configuration, assembles the
/// pipeline, and runs the listeners.
pub struct Host {
    config: Arc<ServerConfig>,
    hooks: Arc<dyn AppHooks>,
    certificates: Option<Arc<dyn CertificateProvider>>,
}

impl Host {
    /// Validate the configuration and prepare a host.
    ///
    /// A contradictory configuration fails here, before any socket is
    /// opened.
    pub fn new(config: ServerConfig, hooks: impl AppHooks) -> Result<Self, HostError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            hooks: Arc::new(hooks),
            certificates: None,
        })
    }

    /// Replace the configured certificate acquisition with an
    /// application-supplied provider.
    pub fn with_certificate_provider(mut self, provider: Arc<dyn CertificateProvider>) -> Self {
        self.certificates = Some(provider);
        self
    }

    /// Assemble the pipeline and serve until shutdown.
    pub async fn run(self) -> Result<(), HostError> {
        let certificates = self.certificate_source()?;
        let pipeline = pipeline::assemble(
            self.config.clone(),
            self.hooks.clone(),
            certificates.as_ref(),
        )?;
        http::start_server(pipeline, self.config, certificates).await?;
        Ok(())
    }

    fn certificate_source(&self) -> Result<Option<CertificateSource>, HostError> {
        if !self.config.http.https_enabled {
            return Ok(None);
        }
        if let Some(provider) = &self.certificates {
            return Ok(Some(CertificateSource::Provider(provider.clone())));
        }
        match self.config.http.tls.mode {
            TlsMode::Acme => Ok(Some(CertificateSource::Acme)),
            TlsMode::Manual => {
                let cert_path = self.config.http.tls.cert_path.as_deref().ok_or_else(|| {
                    ConfigError::Validation("http.tls.cert_path is required".to_string())
                })?;
                let key_path = self.config.http.tls.key_path.as_deref().ok_or_else(|| {
                    ConfigError::Validation("http.tls.key_path is required".to_string())
                })?;
                let provider = StaticCertificateProvider::load(cert_path, key_path)?;
                Ok(Some(CertificateSource::Manual(Arc::new(provider))))
            }
        }
    }
}
