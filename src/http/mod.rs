//! HTTP server module with TLS support.
//!
//! This module binds the listeners for an assembled pipeline:
//! - **Plaintext listener**: always bound; with HTTPS enabled it serves the
//!   same pipeline behind a marker so requests redirect to HTTPS, except
//!   ACME challenge paths which are answered in the clear
//! - **TLS listener**: bound when HTTPS is enabled, with ACME (default),
//!   manual PEM files, or an application-supplied certificate provider
//!
//! The server includes:
//! - Graceful shutdown on SIGTERM/SIGINT across all listeners
//! - Certificate hot-reload via SIGHUP (manual mode)

pub(crate) mod redirect;
mod server;
mod shutdown;
pub(crate) mod static_files;

pub use redirect::PlainHttp;
pub use server::{start_server, ServerError};
pub use static_files::create_static_service;
