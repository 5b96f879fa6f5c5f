//! HTTPS enforcement and ACME challenge bypass stages.
//!
//! Both listeners serve the same assembled pipeline; the plaintext listener
//! wraps it with a [`PlainHttp`] marker extension. The bypass stage answers
//! ACME HTTP-01 challenge paths over plaintext before any redirect decision,
//! and the enforcement stage then redirects every other plaintext request to
//! HTTPS while stamping TLS responses with Strict-Transport-Security.

use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, HOST, STRICT_TRANSPORT_SECURITY};
use axum::http::{StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::config::{ServerConfig, ACME_CHALLENGE_PREFIX, STRICT_TRANSPORT_SECURITY_VALUE};
use crate::pipeline::PipelineState;

/// Marker extension identifying requests that arrived over the plaintext
/// listener.
#[derive(Debug, Clone, Copy)]
pub struct PlainHttp;

/// ACME challenge bypass: challenge paths must be served as plaintext HTTP
/// even while HTTPS is otherwise enforced, so this stage runs before the
/// redirect decision and never forwards challenge requests to it.
pub(crate) async fn acme_challenge_bypass(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<PlainHttp>().is_some() {
        if let Some(token) = request.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX) {
            let answer = state
                .certificates
                .as_ref()
                .and_then(|provider| provider.challenge_response(token));
            return match answer {
                Some(key_authorization) => {
                    tracing::debug!(token = %token, "Serving ACME challenge response");
                    (StatusCode::OK, key_authorization).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            };
        }
    }
    next.run(request).await
}

/// HTTPS enforcement: redirect plaintext requests, add HSTS to TLS responses.
pub(crate) async fn https_enforcement(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<PlainHttp>().is_some() {
        let host = request
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .map(|host| host.split(':').next().unwrap_or(host).to_string());
        return redirect_to_https(&state.config, host, request.uri());
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(STRICT_TRANSPORT_SECURITY_VALUE),
    );
    response
}

/// Generate a permanent redirect to the HTTPS listener, preserving the
/// request path and query.
fn redirect_to_https(config: &ServerConfig, host: Option<String>, uri: &Uri) -> Response {
    let host = host.unwrap_or_else(|| config.http.main_domain.clone());
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let https_url = if config.http.https_port == 443 {
        format!("https://{host}{path_and_query}")
    } else {
        format!("https://{}:{}{}", host, config.http.https_port, path_and_query)
    };

    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");

    Redirect::permanent(&https_url).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;

    fn https_config(https_port: u16) -> ServerConfig {
        let mut config: ServerConfig = toml::from_str("[http]\n").expect("config should parse");
        config.http.https_enabled = true;
        config.http.https_port = https_port;
        config.http.main_domain = "example.com".to_string();
        config
    }

    #[test]
    fn redirect_preserves_path_and_query() {
        let response = redirect_to_https(
            &https_config(443),
            Some("example.com".to_string()),
            &Uri::from_static("/a/b?c=d"),
        );
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers().get(LOCATION).map(|v| v.to_str().unwrap()),
            Some("https://example.com/a/b?c=d")
        );
    }

    #[test]
    fn redirect_includes_non_default_port_and_falls_back_to_main_domain() {
        let response = redirect_to_https(&https_config(8443), None, &Uri::from_static("/"));
        assert_eq!(
            response.headers().get(LOCATION).map(|v| v.to_str().unwrap()),
            Some("https://example.com:8443/")
        );
    }
}
