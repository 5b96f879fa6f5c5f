//! Pipeline assembly.
//!
//! The assembler reads the configuration exactly once at startup and turns it
//! into two things: an ordered stage plan (a first-class, testable value) and
//! the concrete `axum::Router` realizing that plan. The plan lists stages
//! outside-in; a stage earlier in the list wraps everything after it, so the
//! status hook dispatcher appearing before Routing means it observes the
//! routing chain's finalized status.
//!
//! Rebuilding a pipeline mid-run is not supported: configuration is
//! load-once and the assembled router is shared read-only across all request
//! tasks.

mod auth;
mod exception_guard;
mod session;
mod status_hooks;
mod validation;

pub use session::Session;
pub(crate) use session::SessionStore;

use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{Extension, Router};
use axum_extra::extract::cookie::Key;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::config::{ServerConfig, CACHE_CONTROL_STATIC};
use crate::hooks::{AppHooks, ServiceMap};
use crate::http::redirect;
use crate::http::static_files;
use crate::middleware::request_span_layer;
use crate::routing::{ControllerRegistry, RouteError, RouteTable};
use crate::tls::{CertificateProvider, CertificateSource};

/// One unit of the assembled request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Outermost failure capture with body buffering
    ExceptionGuard,
    /// Diagnostic substitute for the exception guard
    DeveloperErrorPage,
    /// Field-level validation failures to their hook
    InputValidation,
    /// ACME HTTP-01 challenge paths served as plaintext
    AcmeChallengeBypass,
    /// HTTP to HTTPS redirect plus HSTS
    HttpsEnforcement,
    /// Static assets, short-circuiting before session allocation
    StaticFiles,
    /// Cookie-backed server-side sessions
    Session,
    /// Final status code to at most one outcome hook
    StatusHooks,
    /// Route resolution
    Routing,
    /// Authentication bridge
    Authentication,
    /// Access policy enforcement
    Authorization,
    /// Handler execution
    Endpoints,
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("HTTPS is enabled but no certificate provider is available")]
    MissingCertificateProvider,

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Shared state threaded through every pipeline stage.
#[derive(Clone)]
pub struct PipelineState {
    pub config: Arc<ServerConfig>,
    pub hooks: Arc<dyn AppHooks>,
    pub(crate) routes: Arc<RouteTable>,
    pub(crate) sessions: Option<Arc<SessionStore>>,
    pub(crate) certificates: Option<Arc<dyn CertificateProvider>>,
    cookie_key: Key,
}

impl FromRef<PipelineState> for Key {
    fn from_ref(state: &PipelineState) -> Key {
        state.cookie_key.clone()
    }
}

/// The assembled pipeline: the ordered stage plan plus the router realizing
/// it.
pub struct Pipeline {
    plan: Vec<Stage>,
    router: Router,
}

impl Pipeline {
    /// The assembled stage order, outside-in.
    pub fn plan(&self) -> &[Stage] {
        &self.plan
    }

    /// The router serving the pipeline. Cloneable; both listeners serve it.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Build the pipeline from configuration and application hooks.
///
/// Called exactly once per server process, before any connection is
/// accepted. Fails fatally when HTTPS is enabled without a certificate
/// source or when a configured route pattern is malformed.
pub fn assemble(
    config: Arc<ServerConfig>,
    hooks: Arc<dyn AppHooks>,
    certificates: Option<&CertificateSource>,
) -> Result<Pipeline, AssembleError> {
    let https = config.http.https_enabled;
    let frontend = config.controller.is_frontend;
    if https && certificates.is_none() {
        return Err(AssembleError::MissingCertificateProvider);
    }

    let mut controllers = ControllerRegistry::new();
    hooks.controller_options(&mut controllers);
    let routes = Arc::new(RouteTable::build(&config.controller, controllers)?);

    let mut services = ServiceMap::new();
    hooks.specific_services(&mut services);

    let cookie_secret = config
        .controller
        .cookie_secret
        .clone()
        .unwrap_or_else(|| format!("{}{}", Uuid::new_v4(), Uuid::new_v4()));
    let state = PipelineState {
        config: config.clone(),
        hooks: hooks.clone(),
        routes,
        sessions: frontend.then(|| Arc::new(SessionStore::new(&config))),
        certificates: certificates.and_then(CertificateSource::provider),
        cookie_key: session::derive_cookie_key(&cookie_secret),
    };

    let mut plan = Vec::new();
    plan.push(if config.use_developer_error_page {
        Stage::DeveloperErrorPage
    } else {
        Stage::ExceptionGuard
    });
    plan.push(Stage::InputValidation);
    if https {
        plan.push(Stage::AcmeChallengeBypass);
        plan.push(Stage::HttpsEnforcement);
    }
    if frontend {
        plan.push(Stage::StaticFiles);
        plan.push(Stage::Session);
    }
    plan.extend([
        Stage::StatusHooks,
        Stage::Routing,
        Stage::Authentication,
        Stage::Authorization,
        Stage::Endpoints,
    ]);

    // Innermost first: each `layer` call wraps everything built so far.
    let mut router = Router::new()
        .fallback(crate::routing::dispatch)
        .with_state(state.clone());
    router = hooks.late_build(router);
    router = hooks.build_between_routing_and_endpoints(router);
    router = router.layer(from_fn(auth::authorize));
    router = router.layer(from_fn_with_state(
        state.clone(),
        auth::authentication_bridge,
    ));
    router = router.layer(from_fn_with_state(state.clone(), crate::routing::resolve_route));
    router = router.layer(from_fn_with_state(
        state.clone(),
        status_hooks::dispatch_status_hooks,
    ));
    if frontend {
        router = router.layer(from_fn_with_state(state.clone(), session::session_layer));
        let static_routes = Router::new()
            .nest_service(
                "/static",
                static_files::create_static_service(&config.controller.static_dir),
            )
            .layer(SetResponseHeaderLayer::if_not_present(
                CACHE_CONTROL,
                HeaderValue::from_static(CACHE_CONTROL_STATIC),
            ));
        router = static_routes.merge(router);
    }
    if https {
        router = router.layer(from_fn_with_state(state.clone(), redirect::https_enforcement));
        router = router.layer(from_fn_with_state(
            state.clone(),
            redirect::acme_challenge_bypass,
        ));
    }
    router = router.layer(from_fn_with_state(state.clone(), validation::input_validation));
    router = hooks.early_build(router);
    router = router.layer(Extension(services));
    if config.use_developer_error_page {
        router = router.layer(from_fn_with_state(
            state.clone(),
            exception_guard::developer_error_page,
        ));
    } else {
        router = router.layer(from_fn_with_state(state, exception_guard::exception_guard));
    }
    router = router.layer(from_fn(request_span_layer));

    tracing::info!(stages = ?plan, "Assembled request pipeline");

    Ok(Pipeline { plan, router })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{FieldError, PipelineFailure, RequestContext};
    use crate::tls::CertificateProvider;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use rustls::sign::CertifiedKey;

    struct NoopHooks;

    #[async_trait]
    impl AppHooks for NoopHooks {
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

    #[derive(Debug)]
    struct EmptyProvider;

    impl CertificateProvider for EmptyProvider {
        fn current_certificate(&self, _server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
            None
        }
    }

    fn config(toml: &str) -> Arc<ServerConfig> {
        Arc::new(toml::from_str(toml).expect("config should parse"))
    }

    fn certificates() -> CertificateSource {
        CertificateSource::Provider(Arc::new(EmptyProvider))
    }

    fn plan_for(config: Arc<ServerConfig>, certificates: Option<&CertificateSource>) -> Vec<Stage> {
        assemble(config, Arc::new(NoopHooks), certificates)
            .expect("pipeline should assemble")
            .plan()
            .to_vec()
    }

    #[test]
    fn https_disabled_never_includes_https_stages() {
        let plan = plan_for(config("[http]\n"), None);
        assert!(!plan.contains(&Stage::HttpsEnforcement));
        assert!(!plan.contains(&Stage::AcmeChallengeBypass));
    }

    #[test]
    fn https_plan_orders_bypass_before_enforcement() {
        let plan = plan_for(
            config(
                r#"
                [http]
                https_enabled = true
                main_domain = "example.com"
                [http.csr_info]
                email = "a@b.com"
                "#,
            ),
            Some(&certificates()),
        );
        assert_eq!(
            plan,
            vec![
                Stage::ExceptionGuard,
                Stage::InputValidation,
                Stage::AcmeChallengeBypass,
                Stage::HttpsEnforcement,
                Stage::StatusHooks,
                Stage::Routing,
                Stage::Authentication,
                Stage::Authorization,
                Stage::Endpoints,
            ]
        );
    }

    #[test]
    fn frontend_plan_orders_static_before_session_before_routing() {
        let plan = plan_for(
            config("[http]\n[controller]\nis_frontend = true\n"),
            None,
        );
        assert_eq!(
            plan,
            vec![
                Stage::ExceptionGuard,
                Stage::InputValidation,
                Stage::StaticFiles,
                Stage::Session,
                Stage::StatusHooks,
                Stage::Routing,
                Stage::Authentication,
                Stage::Authorization,
                Stage::Endpoints,
            ]
        );
        let static_index = plan.iter().position(|s| *s == Stage::StaticFiles);
        let session_index = plan.iter().position(|s| *s == Stage::Session);
        let routing_index = plan.iter().position(|s| *s == Stage::Routing);
        assert!(static_index < session_index && session_index < routing_index);
    }

    #[test]
    fn developer_error_page_replaces_the_exception_guard() {
        let plan = plan_for(config("use_developer_error_page = true\n[http]\n"), None);
        assert_eq!(plan[0], Stage::DeveloperErrorPage);
        assert!(!plan.contains(&Stage::ExceptionGuard));
    }

    #[test]
    fn status_hooks_wrap_the_routing_chain() {
        let plan = plan_for(config("[http]\n"), None);
        let status_index = plan.iter().position(|s| *s == Stage::StatusHooks);
        let routing_index = plan.iter().position(|s| *s == Stage::Routing);
        let auth_index = plan.iter().position(|s| *s == Stage::Authentication);
        let authz_index = plan.iter().position(|s| *s == Stage::Authorization);
        let endpoints_index = plan.iter().position(|s| *s == Stage::Endpoints);
        assert!(status_index < routing_index);
        assert!(routing_index < auth_index);
        assert!(auth_index < authz_index);
        assert!(authz_index < endpoints_index);
    }

    #[test]
    fn https_without_certificate_provider_is_fatal() {
        let result = assemble(
            config(
                r#"
                [http]
                https_enabled = true
                main_domain = "example.com"
                [http.csr_info]
                email = "a@b.com"
                "#,
            ),
            Arc::new(NoopHooks),
            None,
        );
        assert!(matches!(
            result,
            Err(AssembleError::MissingCertificateProvider)
        ));
    }

    #[test]
    fn malformed_route_pattern_is_fatal() {
        let result = assemble(
            config(
                r#"
                [http]
                [[controller.additional_routes]]
                name = "broken"
                pattern = ""
                "#,
            ),
            Arc::new(NoopHooks),
            None,
        );
        assert!(matches!(result, Err(AssembleError::Route(_))));
    }
}
