use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;

use super::ValidJson;
use crate::{
    AppState,
    auth::{TokenKind, hash_password_blocking, verify_password_blocking},
    error::{AppError, AppResult},
    models::{
        LoginRequest, MAX_NAME_LEN, NewUser, RefreshRequest, RegisterRequest, Role, TokenPair,
        UserProfile, validate_email, validate_password, validate_text,
    },
};

const BAD_CREDENTIALS: &str = "incorrect email or password";

/// register
///
/// [Public Route] Creates a student or teacher account. Administrators come
/// from the bootstrap configuration, never from this endpoint.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Role cannot be self-assigned"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserProfile>)> {
    let role = payload.role.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(AppError::forbidden("administrator accounts cannot be self-registered"));
    }
    let email = validate_email(&payload.email)?;
    let full_name = validate_text("full_name", &payload.full_name, MAX_NAME_LEN)?;
    validate_password(&payload.password)?;

    let password_hash = hash_password_blocking(payload.password).await?;
    let user = state
        .repo
        .create_user(NewUser {
            email,
            full_name,
            role,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = user.id, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// login
///
/// [Public Route] Exchanges credentials for an access/refresh token pair. An
/// unknown email and a wrong password get the same answer.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPair),
        (status = 401, description = "Bad credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> AppResult<Json<TokenPair>> {
    let email = payload.email.trim().to_ascii_lowercase();
    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::unauthorized(BAD_CREDENTIALS))?;

    if !verify_password_blocking(payload.password, user.password_hash.clone()).await? {
        tracing::info!(user_id = user.id, "login rejected");
        return Err(AppError::unauthorized(BAD_CREDENTIALS));
    }

    let tokens = state.jwt.issue_pair(&user, Utc::now())?;
    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(tokens))
}

/// refresh
///
/// [Public Route] Trades a refresh token for a new pair. The user is read
/// again so the new access token carries their current role.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens renewed", body = TokenPair),
        (status = 401, description = "Refresh token invalid or expired")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    let claims = state.jwt.verify(&payload.refresh_token, TokenKind::Refresh)?;
    let user = state
        .repo
        .find_user(claims.user_id()?)
        .await?
        .ok_or_else(|| AppError::unauthorized("user no longer exists"))?;

    Ok(Json(state.jwt.issue_pair(&user, Utc::now())?))
}
