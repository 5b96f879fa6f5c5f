//! Input validation bridge.
//!
//! Handlers report field-level validation failures by returning
//! [`ValidationErrors`](crate::hooks::ValidationErrors); this stage detects
//! the marker on the finished response and hands the failure list to the
//! application's required `on_input_validation_error` hook, which produces
//! the response the client sees. Validation failures never reach the
//! exception guard.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::hooks::{RequestContext, ValidationFailure};
use crate::pipeline::PipelineState;

pub(crate) async fn input_validation(
    State(state): State<PipelineState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::capture(&request);
    let response = next.run(request).await;
    match response.extensions().get::<ValidationFailure>().cloned() {
        Some(failure) => {
            tracing::debug!(
                uri = %ctx.uri,
                errors = failure.0.len(),
                "Dispatching input validation errors"
            );
            state.hooks.on_input_validation_error(&ctx, &failure.0).await
        }
        None => response,
    }
}
