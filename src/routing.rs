//! Controller registry and route resolution.
//!
//! Applications register named controllers with named actions; the route
//! table maps request paths onto them either through convention patterns
//! (`/{action}` on the `default` controller and `/{controller}/{action}`)
//! or, when default routes are disabled, through explicit per-action paths.
//! Additional patterns from configuration are matched first, in order.
//!
//! Resolution happens in a dedicated stage before authentication, so the
//! authorization stage can veto a matched action before its handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use serde::Deserialize;

use crate::config::{ControllerConfig, RoutePatternConfig};
use crate::error::BoxError;
use crate::hooks::{escalated_response, PipelineFailure};
use crate::pipeline::PipelineState;

/// Name of the controller addressed by patterns without a controller segment
pub const DEFAULT_CONTROLLER: &str = "default";

/// Name of the action addressed by patterns without an action segment
pub const DEFAULT_ACTION: &str = "index";

/// Access requirement attached to an action or a configured route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Reachable without authentication
    #[default]
    Anonymous,
    /// Requires a succeeded authentication outcome
    Authenticated,
    /// Requires an authenticated principal holding the named permission
    Permission(String),
}

/// Result type produced by action handlers.
///
/// An `Err` escalates to the exception guard; ordinary failure responses
/// (401/403/404, validation errors) are `Ok` responses with the matching
/// status code.
pub type ActionResult = Result<Response, BoxError>;

type ActionHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// A single invocable endpoint on a controller.
#[derive(Clone)]
pub struct Action {
    handler: ActionHandler,
    access: Access,
    methods: Option<Vec<Method>>,
    route: Option<String>,
}

impl Action {
    pub fn new<H, Fut>(handler: H) -> Self
    where
        H: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request| Box::pin(handler(request))),
            access: Access::Anonymous,
            methods: None,
            route: None,
        }
    }

    /// Restrict the action to the given access policy.
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Restrict the action to the given HTTP methods. Unrestricted actions
    /// accept every method.
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Map the action at an explicit path, independent of convention routes.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.route = Some(normalize_path(&path.into()));
        self
    }

    fn allows(&self, method: &Method) -> bool {
        match &self.methods {
            None => true,
            Some(methods) => methods.contains(method),
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("access", &self.access)
            .field("methods", &self.methods)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

/// A named group of actions.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    actions: HashMap<String, Arc<Action>>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into().to_lowercase(), Arc::new(action));
        self
    }
}

/// All controllers registered by the application, keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, Controller>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, controller: Controller) {
        self.controllers
            .insert(name.into().to_lowercase(), controller);
    }

    fn lookup(&self, controller: &str, action: &str) -> Option<Arc<Action>> {
        self.controllers
            .get(controller)?
            .actions
            .get(action)
            .cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Route '{0}' has an empty pattern")]
    EmptyPattern(String),
    #[error("Route '{name}' has an unknown placeholder '{placeholder}'")]
    UnknownPlaceholder { name: String, placeholder: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Controller,
    Action,
}

/// A compiled route pattern, immutable after startup.
#[derive(Debug, Clone)]
struct CompiledPattern {
    name: String,
    segments: Vec<Segment>,
    default_controller: String,
    default_action: String,
    access: Option<Access>,
}

impl CompiledPattern {
    fn compile(route: &RoutePatternConfig) -> Result<Self, RouteError> {
        let trimmed = route.pattern.trim_matches('/');
        if route.pattern.is_empty() {
            return Err(RouteError::EmptyPattern(route.name.clone()));
        }
        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            for part in trimmed.split('/') {
                segments.push(match part {
                    "{controller}" => Segment::Controller,
                    "{action}" => Segment::Action,
                    literal if literal.starts_with('{') => {
                        return Err(RouteError::UnknownPlaceholder {
                            name: route.name.clone(),
                            placeholder: literal.to_string(),
                        });
                    }
                    literal => Segment::Literal(literal.to_lowercase()),
                });
            }
        }
        let default_controller = if route.default_controller.is_empty() {
            DEFAULT_CONTROLLER.to_string()
        } else {
            route.default_controller.to_lowercase()
        };
        Ok(Self {
            name: route.name.clone(),
            segments,
            default_controller,
            default_action: route.default_action.to_lowercase(),
            access: route.access.clone(),
        })
    }

    /// Match a request path against the pattern, yielding controller and
    /// action names. A trailing `{action}` segment may be omitted by the
    /// request, in which case the default action applies.
    fn matches(&self, path: &str) -> Option<(String, String)> {
        let trimmed = path.trim_matches('/');
        let request_segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        let full_len = self.segments.len();
        let action_omitted = request_segments.len() + 1 == full_len
            && matches!(self.segments.last(), Some(Segment::Action));
        if request_segments.len() != full_len && !action_omitted {
            return None;
        }

        let mut controller = self.default_controller.clone();
        let mut action = self.default_action.clone();
        for (segment, part) in self.segments.iter().zip(request_segments.iter()) {
            match segment {
                Segment::Literal(literal) => {
                    if !part.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
                Segment::Controller => controller = part.to_lowercase(),
                Segment::Action => action = part.to_lowercase(),
            }
        }
        Some((controller, action))
    }
}

/// The route matched for the current request, recorded in its extensions by
/// the routing stage and consumed by authorization and the dispatcher.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route_name: String,
    pub controller: String,
    pub action_name: String,
    pub access: Access,
    action: Arc<Action>,
}

enum Resolution {
    Matched(ResolvedRoute),
    MethodNotAllowed,
    NoMatch,
}

/// Compiled route patterns plus the controller registry; built once by the
/// assembler and shared read-only across all request tasks.
#[derive(Debug)]
pub struct RouteTable {
    patterns: Vec<CompiledPattern>,
    explicit: Vec<(String, String, String, Arc<Action>)>,
    registry: ControllerRegistry,
}

impl RouteTable {
    pub(crate) fn build(
        config: &ControllerConfig,
        registry: ControllerRegistry,
    ) -> Result<Self, RouteError> {
        let mut patterns = Vec::new();
        for route in &config.additional_routes {
            patterns.push(CompiledPattern::compile(route)?);
        }
        if config.use_default_routes {
            patterns.push(CompiledPattern::compile(&RoutePatternConfig {
                name: "noControllerGiven".to_string(),
                pattern: "/{action}".to_string(),
                default_controller: DEFAULT_CONTROLLER.to_string(),
                default_action: DEFAULT_ACTION.to_string(),
                access: None,
            })?);
            patterns.push(CompiledPattern::compile(&RoutePatternConfig {
                name: "normalPattern".to_string(),
                pattern: "/{controller}/{action}".to_string(),
                default_controller: String::new(),
                default_action: DEFAULT_ACTION.to_string(),
                access: None,
            })?);
        }

        let mut explicit = Vec::new();
        for (controller_name, controller) in &registry.controllers {
            for (action_name, action) in &controller.actions {
                if let Some(route) = &action.route {
                    explicit.push((
                        route.clone(),
                        controller_name.clone(),
                        action_name.clone(),
                        Arc::clone(action),
                    ));
                }
            }
        }

        Ok(Self {
            patterns,
            explicit,
            registry,
        })
    }

    fn resolve(&self, path: &str, method: &Method) -> Resolution {
        let normalized = normalize_path(path);
        for (route, controller, action_name, action) in &self.explicit {
            if *route == normalized {
                return Self::admit(
                    "explicit",
                    controller.clone(),
                    action_name.clone(),
                    Arc::clone(action),
                    None,
                    method,
                );
            }
        }
        for pattern in &self.patterns {
            let Some((controller, action_name)) = pattern.matches(path) else {
                continue;
            };
            let Some(action) = self.registry.lookup(&controller, &action_name) else {
                continue;
            };
            return Self::admit(
                &pattern.name,
                controller,
                action_name,
                action,
                pattern.access.clone(),
                method,
            );
        }
        Resolution::NoMatch
    }

    fn admit(
        route_name: &str,
        controller: String,
        action_name: String,
        action: Arc<Action>,
        access_override: Option<Access>,
        method: &Method,
    ) -> Resolution {
        if !action.allows(method) {
            return Resolution::MethodNotAllowed;
        }
        let access = access_override.unwrap_or_else(|| action.access.clone());
        Resolution::Matched(ResolvedRoute {
            route_name: route_name.to_string(),
            controller,
            action_name,
            access,
            action,
        })
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/').to_lowercase();
    format!("/{trimmed}")
}

/// Routing stage: resolve the request path to a controller action.
///
/// An unmatched path continues down the chain so that application routes
/// merged via `late_build` still get their chance; the endpoint dispatcher
/// answers 404 when nothing matched at all. A matched action that rejects
/// the method answers 405 here, inside the status hook dispatcher's scope.
pub(crate) async fn resolve_route(
    State(state): State<PipelineState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.routes.resolve(request.uri().path(), request.method()) {
        Resolution::Matched(route) => {
            tracing::debug!(
                route = %route.route_name,
                controller = %route.controller,
                action = %route.action_name,
                "Resolved route"
            );
            request.extensions_mut().insert(route);
            next.run(request).await
        }
        Resolution::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        Resolution::NoMatch => next.run(request).await,
    }
}

/// Endpoint stage: execute the resolved action, or answer 404.
///
/// Handler errors are not converted into a response body here; they ride an
/// extension marker up to the exception guard, which owns the failure path.
pub(crate) async fn dispatch(State(_state): State<PipelineState>, request: Request) -> Response {
    let Some(route) = request.extensions().get::<ResolvedRoute>().cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match (route.action.handler)(request).await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(
                controller = %route.controller,
                action = %route.action_name,
                error = %error,
                "Action handler failed"
            );
            escalated_response(PipelineFailure::Error(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(pattern: &str, default_controller: &str) -> CompiledPattern {
        CompiledPattern::compile(&RoutePatternConfig {
            name: "test".to_string(),
            pattern: pattern.to_string(),
            default_controller: default_controller.to_string(),
            default_action: DEFAULT_ACTION.to_string(),
            access: None,
        })
        .expect("pattern should compile")
    }

    fn ok_action() -> Action {
        Action::new(|_request| async { Ok(StatusCode::OK.into_response()) })
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let result = CompiledPattern::compile(&RoutePatternConfig {
            name: "broken".to_string(),
            pattern: String::new(),
            default_controller: String::new(),
            default_action: DEFAULT_ACTION.to_string(),
            access: None,
        });
        assert!(matches!(result, Err(RouteError::EmptyPattern(_))));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let result = CompiledPattern::compile(&RoutePatternConfig {
            name: "broken".to_string(),
            pattern: "/{tenant}/{action}".to_string(),
            default_controller: String::new(),
            default_action: DEFAULT_ACTION.to_string(),
            access: None,
        });
        assert!(matches!(
            result,
            Err(RouteError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn action_only_pattern_fills_defaults() {
        let compiled = pattern("/{action}", DEFAULT_CONTROLLER);
        assert_eq!(
            compiled.matches("/about"),
            Some(("default".to_string(), "about".to_string()))
        );
        // Omitted action falls back to the default action.
        assert_eq!(
            compiled.matches("/"),
            Some(("default".to_string(), "index".to_string()))
        );
    }

    #[test]
    fn controller_action_pattern_captures_both() {
        let compiled = pattern("/{controller}/{action}", "");
        assert_eq!(
            compiled.matches("/Orders/List"),
            Some(("orders".to_string(), "list".to_string()))
        );
        assert_eq!(
            compiled.matches("/orders"),
            Some(("orders".to_string(), "index".to_string()))
        );
        assert_eq!(compiled.matches("/a/b/c"), None);
    }

    #[test]
    fn literal_segments_must_match() {
        let compiled = pattern("/api/{controller}/{action}", "");
        assert_eq!(
            compiled.matches("/api/users/show"),
            Some(("users".to_string(), "show".to_string()))
        );
        assert_eq!(compiled.matches("/web/users/show"), None);
    }

    #[test]
    fn route_table_resolves_convention_routes() {
        let mut registry = ControllerRegistry::new();
        registry.register(
            DEFAULT_CONTROLLER,
            Controller::new().action(DEFAULT_ACTION, ok_action()),
        );
        registry.register("orders", Controller::new().action("list", ok_action()));
        let table = RouteTable::build(&ControllerConfig::default(), registry)
            .expect("table should build");

        assert!(matches!(
            table.resolve("/", &Method::GET),
            Resolution::Matched(route) if route.controller == "default" && route.action_name == "index"
        ));
        assert!(matches!(
            table.resolve("/orders/list", &Method::GET),
            Resolution::Matched(route) if route.controller == "orders"
        ));
        assert!(matches!(
            table.resolve("/missing/entirely/nested", &Method::GET),
            Resolution::NoMatch
        ));
    }

    #[test]
    fn disabled_default_routes_only_map_explicit_paths() {
        let mut registry = ControllerRegistry::new();
        registry.register(
            "orders",
            Controller::new()
                .action("list", ok_action().at("/orders/all"))
                .action("hidden", ok_action()),
        );
        let config = ControllerConfig {
            use_default_routes: false,
            ..ControllerConfig::default()
        };
        let table = RouteTable::build(&config, registry).expect("table should build");

        assert!(matches!(
            table.resolve("/orders/all", &Method::GET),
            Resolution::Matched(route) if route.action_name == "list"
        ));
        assert!(matches!(
            table.resolve("/orders/hidden", &Method::GET),
            Resolution::NoMatch
        ));
    }

    #[test]
    fn method_restriction_yields_method_not_allowed() {
        let mut registry = ControllerRegistry::new();
        registry.register(
            DEFAULT_CONTROLLER,
            Controller::new().action(
                "submit",
                ok_action().with_methods([Method::POST]),
            ),
        );
        let table = RouteTable::build(&ControllerConfig::default(), registry)
            .expect("table should build");
        assert!(matches!(
            table.resolve("/submit", &Method::GET),
            Resolution::MethodNotAllowed
        ));
        assert!(matches!(
            table.resolve("/submit", &Method::POST),
            Resolution::Matched(_)
        ));
    }

    #[test]
    fn configured_route_access_overrides_action_access() {
        let mut registry = ControllerRegistry::new();
        registry.register("admin", Controller::new().action("panel", ok_action()));
        let config = ControllerConfig {
            additional_routes: vec![RoutePatternConfig {
                name: "admin".to_string(),
                pattern: "/admin/{action}".to_string(),
                default_controller: "admin".to_string(),
                default_action: "panel".to_string(),
                access: Some(Access::Authenticated),
            }],
            ..ControllerConfig::default()
        };
        let table = RouteTable::build(&config, registry).expect("table should build");
        assert!(matches!(
            table.resolve("/admin/panel", &Method::GET),
            Resolution::Matched(route) if route.access == Access::Authenticated
        ));
    }
}
