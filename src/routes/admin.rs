use crate::{
    AppState, handlers,
    middleware::{Access, Guard, guard},
};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, patch},
};

/// Admin Router Module
///
/// User administration and issue removal. The guard rejects every other role
/// with 403 before a handler runs.
pub fn admin_routes(state: &AppState) -> Router<AppState> {
    let access = Guard::new(state.pipeline.clone(), Access::ADMIN);

    Router::new()
        // GET /user
        .route("/user", get(handlers::user::list_users))
        // GET/DELETE /user/{id}
        .route(
            "/user/{id}",
            get(handlers::user::get_user).delete(handlers::user::delete_user),
        )
        // PATCH /user/{id}/role
        .route("/user/{id}/role", patch(handlers::user::update_role))
        // DELETE /issue/{id}
        // Merged with the GET/PUT routes of the authenticated group.
        .route("/issue/{id}", delete(handlers::issue::delete_issue))
        .route_layer(from_fn_with_state(access, guard))
}
