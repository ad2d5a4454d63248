use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use utoipa::ToSchema;

use super::{ValidJson, ValidPath, ValidQuery, discard_files};
use crate::{
    AppState,
    auth::Identity,
    error::{AppError, AppResult},
    models::{
        Attachment, CreateIssueRequest, Issue, IssueChanges, IssueDetail, IssueFilter,
        IssueListParams, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN, NewAttachment, NewIssue, Page,
        PageParams, UpdateIssueRequest, UpdateStatusRequest, validate_text,
    },
    storage::{attachment_key, file_extension},
};

/// AttachmentUpload
///
/// Shape of the multipart form accepted by `upload_attachment`. Documentation only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct AttachmentUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

// --- Access Helpers ---

async fn load_issue(state: &AppState, id: i64) -> AppResult<Issue> {
    state
        .repo
        .find_issue(id)
        .await?
        .ok_or_else(|| AppError::not_found("issue"))
}

/// Loads the issue and checks the caller may read it.
async fn readable_issue(state: &AppState, identity: &Identity, id: i64) -> AppResult<Issue> {
    let issue = load_issue(state, id).await?;
    if !identity.can_read(issue.owner_id) {
        return Err(AppError::forbidden("you can only access your own issues"));
    }
    Ok(issue)
}

/// Loads the issue and checks the caller owns it or is an administrator.
async fn modifiable_issue(state: &AppState, identity: &Identity, id: i64) -> AppResult<Issue> {
    let issue = load_issue(state, id).await?;
    if !identity.can_modify(issue.owner_id) {
        return Err(AppError::forbidden("only the owner or an administrator can modify this issue"));
    }
    Ok(issue)
}

// --- Handlers ---

/// create_issue
///
/// [Authenticated Route] Reports a new issue owned by the caller. New issues are `open`.
#[utoipa::path(
    post,
    path = "/issue",
    tag = "issue",
    request_body = CreateIssueRequest,
    responses(
        (status = 201, description = "Issue created", body = Issue),
        (status = 400, description = "Invalid input")
    )
)]
pub async fn create_issue(
    identity: Identity,
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateIssueRequest>,
) -> AppResult<(StatusCode, Json<Issue>)> {
    let issue = NewIssue {
        title: validate_text("title", &payload.title, MAX_TITLE_LEN)?,
        description: validate_text("description", &payload.description, MAX_DESCRIPTION_LEN)?,
    };
    let issue = state.repo.create_issue(identity.user_id, issue).await?;

    tracing::info!(issue_id = issue.id, owner_id = issue.owner_id, "issue created");
    Ok((StatusCode::CREATED, Json(issue)))
}

/// list_issues
///
/// [Authenticated Route] Newest first. Students only ever see their own issues.
#[utoipa::path(
    get,
    path = "/issue",
    tag = "issue",
    params(IssueListParams),
    responses((status = 200, description = "One page of issues", body = Page<Issue>))
)]
pub async fn list_issues(
    identity: Identity,
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<IssueListParams>,
) -> AppResult<Json<Page<Issue>>> {
    let request = PageParams {
        page: params.page,
        page_size: params.page_size,
    }
    .resolve(state.config.default_page, state.config.default_page_size)?;

    let filter = IssueFilter {
        owner_id: (!identity.role.sees_all_issues()).then_some(identity.user_id),
        status: params.status,
    };
    Ok(Json(state.repo.list_issues(filter, request).await?))
}

/// get_issue
///
/// [Authenticated Route] The issue with its attachments.
#[utoipa::path(
    get,
    path = "/issue/{id}",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Issue found", body = IssueDetail),
        (status = 403, description = "Not the caller's issue"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn get_issue(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<IssueDetail>> {
    let issue = readable_issue(&state, &identity, id).await?;
    let attachments = state.repo.list_attachments(id).await?;
    Ok(Json(IssueDetail { issue, attachments }))
}

/// update_issue
///
/// [Authenticated Route] Owner or administrator. Omitted fields stay as they are.
#[utoipa::path(
    put,
    path = "/issue/{id}",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    request_body = UpdateIssueRequest,
    responses(
        (status = 200, description = "Issue updated", body = Issue),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn update_issue(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
    ValidJson(payload): ValidJson<UpdateIssueRequest>,
) -> AppResult<Json<Issue>> {
    modifiable_issue(&state, &identity, id).await?;

    let changes = IssueChanges {
        title: payload
            .title
            .as_deref()
            .map(|title| validate_text("title", title, MAX_TITLE_LEN))
            .transpose()?,
        description: payload
            .description
            .as_deref()
            .map(|text| validate_text("description", text, MAX_DESCRIPTION_LEN))
            .transpose()?,
    };
    Ok(Json(state.repo.update_issue(id, changes).await?))
}

/// update_status
///
/// [Authenticated Route] Owner or administrator. Illegal transitions are a 400.
#[utoipa::path(
    patch,
    path = "/issue/{id}/status",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = Issue),
        (status = 400, description = "Transition not allowed"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn update_status(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
    ValidJson(payload): ValidJson<UpdateStatusRequest>,
) -> AppResult<Json<Issue>> {
    let before = modifiable_issue(&state, &identity, id).await?;
    let issue = state.repo.transition_issue(id, payload.status).await?;

    tracing::info!(issue_id = id, from = %before.status, to = %issue.status, "issue status changed");
    Ok(Json(issue))
}

/// delete_issue
///
/// [Admin Route] Removes the issue and its attachments. Attachment files are
/// removed afterwards on a best-effort basis.
#[utoipa::path(
    delete,
    path = "/issue/{id}",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn delete_issue(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<StatusCode> {
    let removed = state.repo.delete_issue(id).await?;
    discard_files(&state.files, &removed).await;

    tracing::info!(issue_id = id, deleted_by = identity.user_id, "issue deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// upload_attachment
///
/// [Authenticated Route] Stores the image sent in the multipart field `file`.
/// The file is written first; if the row cannot be recorded the file is
/// removed again.
#[utoipa::path(
    post,
    path = "/issue/{id}/attachments",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    request_body(content = AttachmentUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Attachment stored", body = Attachment),
        (status = 400, description = "Missing file, unsupported type or too large"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn upload_attachment(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Attachment>)> {
    modifiable_issue(&state, &identity, id).await?;
    let upload = &state.config.upload;

    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_owned)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::validation("the uploaded file has no name"))?;
        let bytes = field.bytes().await?;
        file = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = file.ok_or_else(|| AppError::validation("multipart field `file` is required"))?;

    let extension = file_extension(&file_name)
        .filter(|ext| upload.is_allowed(ext))
        .ok_or_else(|| {
            let mut allowed: Vec<&str> = upload.allowed_extensions.iter().map(String::as_str).collect();
            allowed.sort_unstable();
            AppError::validation(format!("file type not allowed; allowed: {}", allowed.join(", ")))
        })?;
    if bytes.is_empty() {
        return Err(AppError::validation("the uploaded file is empty"));
    }
    if bytes.len() as u64 > upload.max_bytes() {
        return Err(AppError::validation(format!(
            "file exceeds the maximum size of {} KB",
            upload.max_image_size_kb
        )));
    }

    let key = attachment_key(id, &extension);
    state
        .files
        .save(&key, &bytes)
        .await
        .map_err(|e| AppError::internal(format!("failed to store attachment: {e}")))?;

    let record = NewAttachment {
        file_name,
        path: key.clone(),
        size_bytes: bytes.len() as i64,
        extension,
    };
    match state.repo.add_attachment(id, record).await {
        Ok(attachment) => {
            tracing::info!(issue_id = id, attachment_id = attachment.id, size = attachment.size_bytes, "attachment stored");
            Ok((StatusCode::CREATED, Json(attachment)))
        }
        Err(err) => {
            if let Err(e) = state.files.remove(&key).await {
                tracing::warn!(path = %key, error = %e, "failed to remove orphaned attachment file");
            }
            Err(err)
        }
    }
}

/// list_attachments
///
/// [Authenticated Route] Same read rule as `get_issue`.
#[utoipa::path(
    get,
    path = "/issue/{id}/attachments",
    tag = "issue",
    params(("id" = i64, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Attachments of the issue", body = [Attachment]),
        (status = 403, description = "Not the caller's issue"),
        (status = 404, description = "No such issue")
    )
)]
pub async fn list_attachments(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath(id): ValidPath<i64>,
) -> AppResult<Json<Vec<Attachment>>> {
    readable_issue(&state, &identity, id).await?;
    Ok(Json(state.repo.list_attachments(id).await?))
}

/// delete_attachment
///
/// [Authenticated Route] Owner or administrator.
#[utoipa::path(
    delete,
    path = "/issue/{id}/attachments/{attachment_id}",
    tag = "issue",
    params(
        ("id" = i64, Path, description = "Issue id"),
        ("attachment_id" = i64, Path, description = "Attachment id")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such issue or attachment")
    )
)]
pub async fn delete_attachment(
    identity: Identity,
    State(state): State<AppState>,
    ValidPath((id, attachment_id)): ValidPath<(i64, i64)>,
) -> AppResult<StatusCode> {
    modifiable_issue(&state, &identity, id).await?;
    let removed = state.repo.delete_attachment(id, attachment_id).await?;
    discard_files(&state.files, std::slice::from_ref(&removed)).await;
    Ok(StatusCode::NO_CONTENT)
}
