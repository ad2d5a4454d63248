use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware as axum_middleware,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod storage;

// Routing, segregated by the access each group requires.
pub mod routes;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{InMemoryRepository, MySqlRepository, RepositoryState};
pub use storage::{FileStoreState, LocalFileStore, MockFileStore};

use auth::JwtKeys;
use middleware::Pipeline;

/// ApiDoc
///
/// Aggregates every documented handler and schema. Title, version and
/// description are replaced at runtime from the configuration (see `api_doc`).
#[derive(OpenApi)]
#[openapi(
    modifiers(&BearerAuth),
    paths(
        handlers::root::root, handlers::root::health,
        handlers::auth::register, handlers::auth::login, handlers::auth::refresh,
        handlers::user::get_me, handlers::user::update_me, handlers::user::list_users,
        handlers::user::get_user, handlers::user::update_role, handlers::user::delete_user,
        handlers::issue::create_issue, handlers::issue::list_issues, handlers::issue::get_issue,
        handlers::issue::update_issue, handlers::issue::update_status, handlers::issue::delete_issue,
        handlers::issue::upload_attachment, handlers::issue::list_attachments,
        handlers::issue::delete_attachment,
    ),
    components(
        schemas(
            models::Role, models::IssueStatus, models::Issue, models::Attachment,
            models::IssueDetail, models::UserProfile, models::TokenPair,
            models::RegisterRequest, models::LoginRequest, models::RefreshRequest,
            models::UpdateProfileRequest, models::UpdateRoleRequest,
            models::CreateIssueRequest, models::UpdateIssueRequest, models::UpdateStatusRequest,
            handlers::root::RootResponse, handlers::root::HealthResponse,
            handlers::issue::AttachmentUpload,
        )
    ),
    security(("bearer" = [])),
    tags(
        (name = "system", description = "Liveness and health"),
        (name = "auth", description = "Registration and tokens"),
        (name = "user", description = "Profiles and user administration"),
        (name = "issue", description = "Issues and their attachments")
    )
)]
struct ApiDoc;

/// Registers the `Authorization: Bearer <jwt>` scheme.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// api_doc
///
/// The OpenAPI document with the configured application metadata.
pub fn api_doc(config: &AppConfig) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = config.app.name.clone();
    doc.info.version = config.app.version.clone();
    doc.info.description = Some(config.app.description.clone());
    doc
}

/// AppState
///
/// The single, immutable container of everything a request may need. Cloning
/// is cheap: every service sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: persistence behind the `Repository` trait.
    pub repo: RepositoryState,
    /// Attachment file storage.
    pub files: FileStoreState,
    pub config: Arc<AppConfig>,
    /// Signing keys derived once from the configured secret.
    pub jwt: JwtKeys,
    /// The interceptor pipeline shared by every route group.
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(config: AppConfig, repo: RepositoryState, files: FileStoreState) -> Self {
        let jwt = JwtKeys::new(&config.jwt);
        let pipeline = Arc::new(Pipeline::standard(jwt.clone()));
        Self {
            repo,
            files,
            config: Arc::new(config),
            jwt,
            pipeline,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for FileStoreState {
    fn from_ref(app_state: &AppState) -> FileStoreState {
        app_state.files.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Arc<AppConfig> {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure, applies global middleware and registers
/// the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly. Each group carries its own access guard.
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc(&state.config)))
        .merge(routes::public::public_routes(&state))
        .merge(routes::authenticated::authenticated_routes(&state))
        .merge(routes::admin::admin_routes(&state))
        .with_state(state);

    // 3. Observability and Correlation Layers (outermost first)
    base_router
        .layer(axum_middleware::from_fn(middleware::timing::track_timing))
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing, correlated by the generated request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span: method, URI and the `x-request-id` header, so
/// every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

/// log_filter
///
/// Default `EnvFilter` directive when `RUST_LOG` is unset. `DEBUG=true`
/// forces the debug level regardless of `LOG_LEVEL`.
pub fn log_filter(config: &AppConfig) -> String {
    let level = if config.debug { "debug" } else { config.log_level.as_str() };
    format!("issue_desk={level},tower_http={level}")
}

/// init_tracing
///
/// Installs the global subscriber: pretty output in development, JSON for
/// log aggregation everywhere else.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter(config).into());

    match config.env {
        config::Env::Development => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
        config::Env::Testing | config::Env::Production => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
