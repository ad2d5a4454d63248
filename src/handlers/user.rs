use axum::{
    Json,
    extract::State,
    http::StatusCode,
};

use super::{ValidJson, ValidPath, ValidQuery, discard_files};
use crate::{
    AppState,
    auth::{Identity, hash_password_blocking},
    error::{AppError, AppResult},
    models::{
        MAX_NAME_LEN, Page, PageParams, UpdateProfileRequest, UpdateRoleRequest, UserChanges,
        UserProfile, validate_email, validate_password, validate_text,
    },
};

/// get_me
///
/// [Authenticated Route] Profile of the caller.
#[utoipa::path(
    get,
    path = "/user/me",
    tag = "user",
    responses(
        (status = 200, description = "Caller profile", body = UserProfile),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_me(identity: Identity, State(state): State<AppState>) -> AppResult<Json<UserProfile>> {
    let user = state
        .repo
        .find_user(identity.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(Json(user.into()))
}

/// update_me
///
/// [Authenticated Route] Partial update of the caller's own profile. A new
/// password is hashed before it reaches the repository.
#[utoipa::path(
    put,
    path = "/user/me",
    tag = "user",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn update_me(
    identity: Identity,
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<UpdateProfileRequest>,
) -> AppResult<Json<UserProfile>> {
    let email = payload.email.as_deref().map(validate_email).transpose()?;
    let full_name = payload
        .full_name
        .as_deref()
        .map(|name| validate_text("full_name", name, MAX_NAME_LEN))
        .transpose()?;
    let password_hash = match payload.password {
        Some(password) => {
            validate_password(&password)?;
            Some(hash_password_blocking(password).await?)
        }
        None => None,
    };

    let user = state
        .repo
        .update_user(
            identity.user_id,
            UserChanges {
                email,
                full_name,
                password_hash,
            },
        )
        .await?;
    Ok(Json(user.into()))
}

/// list_users
///
/// [Admin Route] Every account, oldest first.
#[utoipa::path(
    get,
    path = "/user",
    tag = "user",
    params(PageParams),
    responses(
        (status = 200, description = "One page of users", body = Page<UserProfile>),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<PageParams>,
) -> AppResult<Json<Page<UserProfile>>> {
    let request = params.resolve(state.config.default_page, state.config.default_page_size)?;
    let page = state.repo.list_users(request).await?;

    Ok(Json(Page {
        items: page.items.into_iter().map(UserProfile::from).collect(),
        page: page.page,
        page_size: page.page_size,
        total: page.total,
    }))
}

/// get_user
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/user/{id}",
    tag = "user",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User found", body = UserProfile),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<UserProfile>> {
    let user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(Json(user.into()))
}

/// update_role
///
/// [Admin Route] Changes another user's role. Tokens already issued keep the
/// old role until they expire.
#[utoipa::path(
    patch,
    path = "/user/{id}/role",
    tag = "user",
    params(("id" = i64, Path, description = "User id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = UserProfile),
        (status = 400, description = "Administrators cannot change their own role"),
        (status = 404, description = "No such user")
    )
)]
pub async fn update_role(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
    ValidJson(payload): ValidJson<UpdateRoleRequest>,
) -> AppResult<Json<UserProfile>> {
    if id == identity.user_id {
        return Err(AppError::validation("administrators cannot change their own role"));
    }
    let user = state.repo.set_user_role(id, payload.role).await?;
    tracing::info!(user_id = id, role = %user.role, changed_by = identity.user_id, "role changed");
    Ok(Json(user.into()))
}

/// delete_user
///
/// [Admin Route] Removes the account with its issues and attachments.
#[utoipa::path(
    delete,
    path = "/user/{id}",
    tag = "user",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Administrators cannot delete themselves"),
        (status = 404, description = "No such user")
    )
)]
pub async fn delete_user(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<StatusCode> {
    if id == identity.user_id {
        return Err(AppError::validation("administrators cannot delete themselves"));
    }
    let removed = state.repo.delete_user(id).await?;
    discard_files(&state.files, &removed).await;

    tracing::info!(user_id = id, deleted_by = identity.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
