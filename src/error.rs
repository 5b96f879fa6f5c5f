//! Startup error taxonomy.
//!
//! Everything here is startup-fatal: the process must abort before any socket
//! is opened. Per-request failures never surface through these types; they are
//! captured by the exception guard and turned into hook invocations.

use crate::config::ConfigError;
use crate::http::ServerError;
use crate::pipeline::AssembleError;
use crate::tls::TlsError;

/// Boxed error type carried by escalated per-request failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Server(#[from] ServerError),
}
