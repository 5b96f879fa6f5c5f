//! Status hook dispatcher.
//!
//! Wraps the routing chain and inspects the finalized status code of each
//! response: 401 dispatches to `on_not_authenticated`, 403 to
//! `on_not_authorized`, 404 and 405 to `on_not_found`. At most one hook
//! fires per request. A hook may return bytes to append to the response
//! body; the status code itself is never altered here. Responses riding the
//! exception guard's failure path bypass dispatch entirely.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;

use crate::hooks::EscalatedFailure;
use crate::pipeline::PipelineState;

pub(crate) async fn dispatch_status_hooks(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = crate::hooks::RequestContext::capture(&request);
    let response = next.run(request).await;
    if response.extensions().get::<EscalatedFailure>().is_some() {
        return response;
    }

    let appended = match response.status().as_u16() {
        401 => state.hooks.on_not_authenticated(&ctx).await,
        403 => state.hooks.on_not_authorized(&ctx).await,
        404 | 405 => state.hooks.on_not_found(&ctx).await,
        _ => None,
    };

    match appended {
        None => response,
        Some(extra) => append_to_body(response, extra).await,
    }
}

/// Rebuild the response with the hook's content appended, keeping status and
/// headers intact apart from the now stale Content-Length.
async fn append_to_body(response: Response, extra: Bytes) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(error = %error, "Failed to read response body for status hook append");
            Bytes::new()
        }
    };
    parts.headers.remove(CONTENT_LENGTH);
    let mut combined = bytes.to_vec();
    combined.extend_from_slice(&extra);
    Response::from_parts(parts, Body::from(combined))
}
