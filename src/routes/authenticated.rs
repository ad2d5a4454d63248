use crate::{
    AppState, handlers,
    middleware::{Access, Guard, guard},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
};

/// Headroom for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Authenticated Router Module
///
/// Routes open to every role once the bearer token checks out. Whether the
/// caller may touch a particular issue (owner, teacher, admin) is decided in
/// the handlers, which receive the resolved `Identity`.
pub fn authenticated_routes(state: &AppState) -> Router<AppState> {
    let access = Guard::new(state.pipeline.clone(), Access::AUTHENTICATED);
    let upload_limit = usize::try_from(state.config.upload.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        // GET/PUT /user/me
        .route(
            "/user/me",
            get(handlers::user::get_me).put(handlers::user::update_me),
        )
        // POST/GET /issue
        // Students only ever list their own issues.
        .route(
            "/issue",
            post(handlers::issue::create_issue).get(handlers::issue::list_issues),
        )
        // GET/PUT /issue/{id}
        // DELETE on the same path lives in the admin group.
        .route(
            "/issue/{id}",
            get(handlers::issue::get_issue).put(handlers::issue::update_issue),
        )
        // PATCH /issue/{id}/status
        .route("/issue/{id}/status", patch(handlers::issue::update_status))
        // POST/GET /issue/{id}/attachments
        // The body limit covers the largest allowed image.
        .route(
            "/issue/{id}/attachments",
            post(handlers::issue::upload_attachment)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(handlers::issue::list_attachments),
        )
        // DELETE /issue/{id}/attachments/{attachment_id}
        .route(
            "/issue/{id}/attachments/{attachment_id}",
            delete(handlers::issue::delete_attachment),
        )
        .route_layer(from_fn_with_state(access, guard))
}
