//! Request interceptors.
//!
//! Every routed request passes through a [`Pipeline`] before its handler runs:
//! an ordered list of [`Interceptor`]s, each a plain function from
//! [`RequestContext`] to `RequestContext` or `AppError`. The first error ends the
//! request; the handler never sees it. The timing layer in [`timing`] sits
//! outside the pipeline and only observes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{
    auth::{Identity, JwtKeys},
    error::AppResult,
    models::Role,
};

mod authenticate;
mod authorize;
mod request_log;
pub mod timing;

pub use authenticate::Authenticate;
pub use authorize::Authorize;
pub use request_log::RequestLog;

/// Access
///
/// What a route group requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone, with or without a token.
    Public,
    /// An authenticated caller whose role is in the set.
    Roles(&'static [Role]),
}

impl Access {
    pub const AUTHENTICATED: Access = Access::Roles(Role::ALL);
    pub const ADMIN: Access = Access::Roles(&[Role::Admin]);
}

/// RequestContext
///
/// The parts of an inbound request the interceptors look at, plus what they
/// have resolved so far.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
    pub access: Access,
    pub identity: Option<Identity>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, access: Access) -> Self {
        Self {
            method,
            path: path.into(),
            authorization: None,
            request_id: None,
            access,
            identity: None,
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    fn from_request(request: &Request, access: Access) -> Self {
        let header = |name| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_owned(),
            authorization: header(AUTHORIZATION.as_str()),
            request_id: header("x-request-id"),
            access,
            identity: None,
        }
    }
}

/// Interceptor
///
/// One step of the pipeline. Implementations must not perform I/O.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, ctx: RequestContext) -> AppResult<RequestContext>;
}

/// Pipeline
///
/// Runs its interceptors in order, stopping at the first error.
pub struct Pipeline {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Authenticate, then Authorize, then RequestLog.
    pub fn standard(keys: JwtKeys) -> Self {
        Self::new(vec![
            Box::new(Authenticate::new(keys)),
            Box::new(Authorize),
            Box::new(RequestLog),
        ])
    }

    pub fn run(&self, ctx: RequestContext) -> AppResult<RequestContext> {
        self.interceptors
            .iter()
            .try_fold(ctx, |ctx, interceptor| interceptor.intercept(ctx))
    }
}

/// Guard
///
/// Middleware state of one route group: the shared pipeline and the group's access rule.
#[derive(Clone)]
pub struct Guard {
    pipeline: Arc<Pipeline>,
    access: Access,
}

impl Guard {
    pub fn new(pipeline: Arc<Pipeline>, access: Access) -> Self {
        Self { pipeline, access }
    }
}

/// guard
///
/// Axum middleware running the pipeline for a route group. On success the
/// resolved `Identity` is stored in the request extensions for the handler's
/// extractor; on failure the error is the response.
pub async fn guard(State(guard): State<Guard>, mut request: Request, next: Next) -> AppResult<Response> {
    let ctx = guard
        .pipeline
        .run(RequestContext::from_request(&request, guard.access))?;

    if let Some(identity) = ctx.identity {
        request.extensions_mut().insert(identity);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::TokenKind, config::AppConfig, error::AppError};
    use chrono::Utc;
    use std::sync::Mutex;

    fn keys() -> JwtKeys {
        JwtKeys::new(&AppConfig::default().jwt)
    }

    fn bearer(role: Role) -> String {
        let token = keys().issue(3, role, TokenKind::Access, Utc::now()).unwrap();
        format!("Bearer {token}")
    }

    /// Records which interceptors ran.
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Interceptor for Recorder {
        fn intercept(&self, ctx: RequestContext) -> AppResult<RequestContext> {
            self.seen.lock().unwrap().push(self.name);
            if self.fail {
                return Err(AppError::forbidden("stop"));
            }
            Ok(ctx)
        }
    }

    #[test]
    fn first_error_stops_the_pipeline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = |name, fail| -> Box<dyn Interceptor> {
            Box::new(Recorder { name, seen: seen.clone(), fail })
        };
        let pipeline = Pipeline::new(vec![recorder("a", false), recorder("b", true), recorder("c", false)]);

        let result = pipeline.run(RequestContext::new(Method::GET, "/", Access::Public));

        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn public_route_needs_no_token() {
        let ctx = Pipeline::standard(keys())
            .run(RequestContext::new(Method::GET, "/health", Access::Public))
            .unwrap();

        assert!(ctx.identity.is_none());
    }

    #[test]
    fn protected_route_without_token_is_unauthorized() {
        let result = Pipeline::standard(keys()).run(RequestContext::new(
            Method::GET,
            "/issue",
            Access::AUTHENTICATED,
        ));

        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn role_outside_the_set_is_forbidden() {
        let ctx = RequestContext::new(Method::GET, "/user", Access::ADMIN)
            .with_authorization(bearer(Role::Teacher));

        let result = Pipeline::standard(keys()).run(ctx);

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn valid_token_attaches_identity() {
        let ctx = RequestContext::new(Method::GET, "/user", Access::ADMIN)
            .with_authorization(bearer(Role::Admin));

        let ctx = Pipeline::standard(keys()).run(ctx).unwrap();

        assert_eq!(
            ctx.identity,
            Some(Identity { user_id: 3, role: Role::Admin })
        );
    }
}
