//! Authentication bridge and authorization stage.
//!
//! The bridge invokes the application's `on_authenticate` hook exactly once
//! per request and records the outcome in the request extensions; the marker
//! doubles as the single-invocation guard, so a stage re-entering the chain
//! cannot trigger a second attempt. The bridge itself never short-circuits:
//! status interpretation belongs to the authorization stage and, for codes
//! produced deeper in the chain, to the status hook dispatcher.
//!
//! Authorization compares the resolved route's access policy against the
//! recorded outcome before the handler runs, answering 401 or 403 so that
//! unauthenticated or unauthorized requests never reach application code.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::hooks::{AuthOutcome, RequestContext};
use crate::pipeline::PipelineState;
use crate::routing::{Access, ResolvedRoute};

pub(crate) async fn authentication_bridge(
    State(state): State<PipelineState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<AuthOutcome>().is_none() {
        let ctx = RequestContext::capture(&request);
        let result = state.hooks.on_authenticate(&ctx).await;
        if !result.succeeded {
            tracing::debug!(reason = %result.failure_reason, "Authentication attempt failed");
        }
        request.extensions_mut().insert(AuthOutcome(Arc::new(result)));
    }
    next.run(request).await
}

pub(crate) async fn authorize(request: Request, next: Next) -> Response {
    let Some(route) = request.extensions().get::<ResolvedRoute>() else {
        // Routes merged by the application authorize themselves.
        return next.run(request).await;
    };
    let authenticated = request
        .extensions()
        .get::<AuthOutcome>()
        .filter(|outcome| outcome.0.succeeded)
        .cloned();

    match (&route.access, authenticated) {
        (Access::Anonymous, _) => next.run(request).await,
        (Access::Authenticated, Some(_)) => next.run(request).await,
        (Access::Permission(permission), Some(outcome)) => {
            let allowed = outcome
                .0
                .principal
                .as_ref()
                .is_some_and(|principal| principal.has_permission(permission));
            if allowed {
                next.run(request).await
            } else {
                StatusCode::FORBIDDEN.into_response()
            }
        }
        (_, None) => StatusCode::UNAUTHORIZED.into_response(),
    }
}
