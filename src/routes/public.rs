use crate::{
    AppState, handlers,
    middleware::{Access, Guard, guard},
};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no token. They still pass through the pipeline so
/// they are logged like every other request.
pub fn public_routes(state: &AppState) -> Router<AppState> {
    let access = Guard::new(state.pipeline.clone(), Access::Public);

    Router::new()
        // GET /
        // Service banner with name and version.
        .route("/", get(handlers::root::root))
        // GET /health
        // Database round trip for monitoring and load balancer checks.
        .route("/health", get(handlers::root::health))
        // POST /auth/register, /auth/login, /auth/refresh
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route_layer(from_fn_with_state(access, guard))
}
