use axum::extract::{FromRequest, FromRequestParts};

use crate::{error::AppError, models::Attachment, storage::FileStoreState};

pub mod auth;
pub mod issue;
pub mod root;
pub mod user;

/// ValidJson
///
/// `axum::Json` with its rejection mapped to `AppError::Validation`, so a
/// malformed or mistyped body is always a 400 with the usual error body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ValidJson<T>(pub T);

/// `axum::extract::Query` with the same rejection mapping as `ValidJson`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ValidQuery<T>(pub T);

/// `axum::extract::Path` with the same rejection mapping as `ValidJson`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ValidPath<T>(pub T);

/// Deletes the files of removed attachments. Failures are logged and
/// otherwise ignored: the rows are already gone.
pub(crate) async fn discard_files(files: &FileStoreState, attachments: &[Attachment]) {
    for attachment in attachments {
        if let Err(e) = files.remove(&attachment.path).await {
            tracing::warn!(path = %attachment.path, error = %e, "failed to remove attachment file");
        }
    }
}
