//! Application extension hooks.
//!
//! Concrete applications plug their business logic into the pipeline through
//! the [`AppHooks`] trait. Most members default to inert implementations; the
//! two failure hooks are required because the core never emits default error
//! bodies on those paths. Authentication deliberately defaults to a failing
//! result so that omitting the hook fails closed, not open.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Serialize;

use crate::error::BoxError;
use crate::routing::ControllerRegistry;

/// Immutable view of a request handed to hooks.
///
/// Captured after the exception guard has buffered the body, so failure hooks
/// can re-read the original request content even though the downstream stages
/// already consumed the body stream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestContext {
    pub(crate) fn capture(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            body: request
                .extensions()
                .get::<BufferedBody>()
                .map(|buffered| buffered.0.clone()),
        }
    }

    /// The fully buffered request body, when the exception guard has run.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Request body bytes retained by the exception guard for failure-hook reads.
#[derive(Debug, Clone)]
pub struct BufferedBody(pub Bytes);

/// An authenticated identity established by the application's hook.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Subject identifier (unique ID from the identity provider)
    pub id: String,
    /// Display name, falling back to the subject ID
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Named permissions consulted by the authorization stage
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            permissions: Vec::new(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Outcome of one authentication attempt.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub succeeded: bool,
    pub principal: Option<Principal>,
    pub failure_reason: String,
}

impl AuthResult {
    pub fn success(principal: Principal) -> Self {
        Self {
            succeeded: true,
            principal: Some(principal),
            failure_reason: String::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            principal: None,
            failure_reason: reason.into(),
        }
    }
}

/// Request-scoped authentication outcome recorded by the bridge.
///
/// Its presence in the request extensions is also the single-invocation
/// guard: the bridge never invokes the hook when the outcome already exists.
#[derive(Debug, Clone)]
pub struct AuthOutcome(pub Arc<AuthResult>);

/// One field-level input validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Returned by handlers to report input validation failures.
///
/// Renders as 400 with a marker the input-validation stage detects; the stage
/// replaces the response with the application's `on_input_validation_error`
/// result. This path never escalates to the exception guard.
#[derive(Debug, Clone)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl IntoResponse for ValidationErrors {
    fn into_response(self) -> Response {
        let mut response = StatusCode::BAD_REQUEST.into_response();
        response
            .extensions_mut()
            .insert(ValidationFailure(Arc::new(self.0)));
        response
    }
}

/// Response-extension marker carrying validation failures to their stage.
#[derive(Debug, Clone)]
pub(crate) struct ValidationFailure(pub Arc<Vec<FieldError>>);

/// A failure captured by the exception guard.
#[derive(Debug)]
pub enum PipelineFailure {
    /// A downstream stage or handler panicked
    Panic(String),
    /// A handler returned an error that no stage converted into a response
    Error(BoxError),
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineFailure::Panic(message) => write!(f, "panic: {message}"),
            PipelineFailure::Error(error) => write!(f, "{error}"),
        }
    }
}

/// Response-extension marker escalating a handler error to the guard.
#[derive(Debug, Clone)]
pub(crate) struct EscalatedFailure(pub Arc<PipelineFailure>);

/// Build the marker response carrying a failure up to the exception guard.
pub(crate) fn escalated_response(failure: PipelineFailure) -> Response {
    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    response
        .extensions_mut()
        .insert(EscalatedFailure(Arc::new(failure)));
    response
}

/// Shared services contributed by the application at startup.
///
/// A typemap cloned into every request's extensions, so handlers and app
/// middleware can look up their collaborators without a service container.
#[derive(Debug, Clone, Default)]
pub struct ServiceMap(http::Extensions);

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, service: T) {
        self.0.insert(service);
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.get::<T>()
    }
}

/// Extension points supplied by the hosted application.
///
/// The pipeline assembler calls the build hooks once at startup; the request
/// hooks run per request at the points described on each member.
#[async_trait]
pub trait AppHooks: Send + Sync + 'static {
    /// Contribute shared services available from every request's extensions.
    fn specific_services(&self, _services: &mut ServiceMap) {}

    /// Register controllers and adjust routing options.
    fn controller_options(&self, _controllers: &mut ControllerRegistry) {}

    /// Add stages that run before the standard pipeline, just inside the
    /// exception guard.
    fn early_build(&self, router: Router) -> Router {
        router
    }

    /// Add middleware between the authorization stage and handler execution.
    fn build_between_routing_and_endpoints(&self, router: Router) -> Router {
        router
    }

    /// Merge application routes and innermost stages.
    fn late_build(&self, router: Router) -> Router {
        router
    }

    /// Decide the authentication outcome for a request. Invoked exactly once
    /// per request; may suspend for remote identity checks.
    async fn on_authenticate(&self, _ctx: &RequestContext) -> AuthResult {
        AuthResult::failure("Authentication not configured")
    }

    /// Observes a finalized 401 response; returned bytes are appended to it.
    async fn on_not_authenticated(&self, _ctx: &RequestContext) -> Option<Bytes> {
        None
    }

    /// Observes a finalized 403 response; returned bytes are appended to it.
    async fn on_not_authorized(&self, _ctx: &RequestContext) -> Option<Bytes> {
        None
    }

    /// Observes a finalized 404 or 405 response; returned bytes are appended.
    async fn on_not_found(&self, _ctx: &RequestContext) -> Option<Bytes> {
        None
    }

    /// Produce the response for a failure captured by the exception guard.
    /// The buffered request body is still readable through the context.
    async fn on_unhandled_exception(
        &self,
        failure: &PipelineFailure,
        ctx: &RequestContext,
    ) -> Response;

    /// Produce the response for field-level input validation failures.
    async fn on_input_validation_error(
        &self,
        ctx: &RequestContext,
        errors: &[FieldError],
    ) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_auth_result_fails_closed() {
        struct Bare;

        #[async_trait]
        impl AppHooks for Bare {
            async fn on_unhandled_exception(
                &self,
                _failure: &PipelineFailure,
                _ctx: &RequestContext,
            ) -> Response {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }

            async fn on_input_validation_error(
                &self,
                _ctx: &RequestContext,
                _errors: &[FieldError],
            ) -> Response {
                StatusCode::BAD_REQUEST.into_response()
            }
        }

        let ctx = RequestContext {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            body: None,
        };
        let result = futures::executor::block_on(Bare.on_authenticate(&ctx));
        assert!(!result.succeeded);
        assert!(result.principal.is_none());
        assert_eq!(result.failure_reason, "Authentication not configured");
    }

    #[test]
    fn principal_permission_lookup() {
        let mut principal = Principal::new("u-1");
        principal.permissions.push("admin".to_string());
        assert!(principal.has_permission("admin"));
        assert!(!principal.has_permission("root"));
        assert_eq!(principal.display_name(), "u-1");
    }
}
