//! Outermost failure-capturing stage.
//!
//! Buffers the inbound request body before any other stage runs, so a
//! failure hook invoked later can still re-read the original content, then
//! catches panics unwinding from downstream stages as well as handler errors
//! escalated by the endpoint dispatcher. Exactly one of the production
//! recovery hook or the developer diagnostic page handles a captured
//! failure; ordinary status-code dispatch is suppressed for that request.

use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use futures::FutureExt;

use crate::config::MAX_BUFFERED_BODY_BYTES;
use crate::hooks::{BufferedBody, EscalatedFailure, PipelineFailure, RequestContext};
use crate::pipeline::PipelineState;

/// Production guard: captured failures are delegated to the application's
/// `on_unhandled_exception` hook, whose response is used verbatim.
pub(crate) async fn exception_guard(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    run_guarded(state, request, next, false).await
}

/// Diagnostic guard: captured failures are rendered as a detailed error page
/// instead of invoking the recovery hook.
pub(crate) async fn developer_error_page(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    run_guarded(state, request, next, true).await
}

async fn run_guarded(
    state: PipelineState,
    request: Request,
    next: Next,
    developer: bool,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(error = %error, "Refusing to buffer oversized request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let mut request = Request::from_parts(parts, Body::from(bytes.clone()));
    request.extensions_mut().insert(BufferedBody(bytes));
    let ctx = RequestContext::capture(&request);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => match response.extensions().get::<EscalatedFailure>().cloned() {
            None => response,
            Some(escalated) => respond_to_failure(&state, &escalated.0, &ctx, developer).await,
        },
        Err(panic) => {
            let failure = PipelineFailure::Panic(panic_message(panic));
            respond_to_failure(&state, &failure, &ctx, developer).await
        }
    }
}

async fn respond_to_failure(
    state: &PipelineState,
    failure: &PipelineFailure,
    ctx: &RequestContext,
    developer: bool,
) -> Response {
    tracing::error!(
        method = %ctx.method,
        uri = %ctx.uri,
        failure = %failure,
        "Unhandled failure captured by exception guard"
    );
    if developer {
        render_diagnostic(failure, ctx)
    } else {
        state.hooks.on_unhandled_exception(failure, ctx).await
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic of unknown type".to_string()
    }
}

fn render_diagnostic(failure: &PipelineFailure, ctx: &RequestContext) -> Response {
    let mut headers = String::new();
    for (name, value) in &ctx.headers {
        headers.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            name,
            value.to_str().unwrap_or("<binary>")
        ));
    }
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Unhandled failure</title></head>
<body>
    <h1>Unhandled failure</h1>
    <p><strong>{failure}</strong></p>
    <p>{method} {uri}</p>
    <table>{headers}</table>
</body>
</html>"#,
        failure = failure,
        method = ctx.method,
        uri = ctx.uri,
        headers = headers,
    );
    (StatusCode::INTERNAL_SERVER_ERROR, Html(body)).into_response()
}
