use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;

/// Upper bound for `page_size` on every paginated listing.
pub const MAX_PAGE_SIZE: u32 = 100;

// --- Enumerations ---

/// Role
///
/// Access tier gating endpoint access. Stored and serialized in lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: &'static [Role] = &[Role::Admin, Role::Teacher, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Admins and teachers oversee every issue; students only their own.
    pub fn sees_all_issues(&self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(AppError::validation(format!("unknown role {other:?}"))),
        }
    }
}

/// IssueStatus
///
/// Lifecycle of a reported issue. `can_transition_to` is the single source of
/// truth for which moves are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (self, next),
            (Open, InProgress)
                | (Open, Closed)
                | (InProgress, Open)
                | (InProgress, Resolved)
                | (InProgress, Closed)
                | (Resolved, Closed)
                | (Resolved, Open)
                | (Closed, Open)
        )
    }

    /// Validates `self -> next`, naming both ends on failure.
    pub fn transition(&self, next: IssueStatus) -> Result<IssueStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::validation(format!(
                "cannot move an issue from {self} to {next}"
            )))
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "resolved" => Ok(IssueStatus::Resolved),
            "closed" => Ok(IssueStatus::Closed),
            other => Err(AppError::validation(format!("unknown status {other:?}"))),
        }
    }
}

// --- Domain Records ---

/// User
///
/// Canonical identity record. The password hash never leaves the server:
/// responses are built from `UserProfile`.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Issue
///
/// A reported problem. `owner_id` always references an existing `User`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Issue {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub status: IssueStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Attachment
///
/// Metadata of a stored image. Owned by exactly one issue and removed with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Attachment {
    pub id: i64,
    pub issue_id: i64,
    /// Original client-side filename.
    pub file_name: String,
    /// Storage key relative to the upload directory.
    pub path: String,
    pub size_bytes: i64,
    pub extension: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Storage Rows ---
//
// Rows mirror the table columns one to one. Enumerations are plain strings
// here and parsed when converting into the domain records above.

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(|_| {
            AppError::internal(format!("user {} has unknown role {:?}", row.id, row.role))
        })?;
        Ok(User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role,
            password_hash: row.password_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct IssueRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<IssueRow> for Issue {
    type Error = AppError;

    fn try_from(row: IssueRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|_| {
            AppError::internal(format!("issue {} has unknown status {:?}", row.id, row.status))
        })?;
        Ok(Issue {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub id: i64,
    pub issue_id: i64,
    pub file_name: String,
    pub path: String,
    pub size_bytes: i64,
    pub extension: String,
    pub created_at: DateTime<Utc>,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            issue_id: row.issue_id,
            file_name: row.file_name,
            path: row.path,
            size_bytes: row.size_bytes,
            extension: row.extension,
            created_at: row.created_at,
        }
    }
}

// --- Repository Inputs ---

/// Fields of a user about to be inserted. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub password_hash: String,
}

/// Partial user update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct IssueChanges {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub path: String,
    pub size_bytes: i64,
    pub extension: String,
}

/// Filters for `list_issues`.
#[derive(Debug, Clone, Copy)]
pub struct IssueFilter {
    pub owner_id: Option<i64>,
    pub status: Option<IssueStatus>,
}

// --- Pagination ---

/// Validated page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

/// PageParams
///
/// Raw `?page=&page_size=` query. Missing values fall back to the configured
/// defaults in `resolve`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageParams {
    pub fn resolve(&self, default_page: u32, default_page_size: u32) -> Result<PageRequest, AppError> {
        let page = self.page.unwrap_or(default_page);
        let page_size = self.page_size.unwrap_or(default_page_size);
        if page == 0 {
            return Err(AppError::validation("page must be at least 1"));
        }
        if page_size == 0 {
            return Err(AppError::validation("page_size must be at least 1"));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(AppError::validation(format!(
                "page_size must be at most {MAX_PAGE_SIZE}"
            )));
        }
        Ok(PageRequest { page, page_size })
    }
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct IssueListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<IssueStatus>,
}

/// Page
///
/// One slice of a listing plus the total number of matching records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        Self {
            items,
            page: request.page,
            page_size: request.page_size,
            total,
        }
    }
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    #[schema(example = "ada@example.edu")]
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// `student` (default) or `teacher`. Administrators are never self-registered.
    #[serde(default)]
    #[ts(optional)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// UpdateProfileRequest
///
/// Partial update of the caller's own profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateIssueRequest {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateIssueRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateStatusRequest {
    pub status: IssueStatus,
}

// --- Responses ---

/// UserProfile
///
/// Public view of a `User`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// TokenPair
///
/// Returned by login and refresh. `expires_in` is the access token lifetime
/// in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    pub attachments: Vec<Attachment>,
}

// --- Input Validation ---

pub fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid && email.len() <= 255 {
        Ok(email)
    } else {
        Err(AppError::validation("email address is not valid"))
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::validation(
            "password must be at least 8 characters long",
        ));
    }
    Ok(())
}

/// Trims `value` and checks it holds between 1 and `max` characters.
pub fn validate_text(field: &str, value: &str, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(AppError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_lifecycle() {
        use IssueStatus::*;

        assert!(Open.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Open));

        assert!(!Open.can_transition_to(Open));
        assert!(!Open.can_transition_to(Resolved));
        assert!(!Closed.can_transition_to(Resolved));
        assert!(matches!(
            Closed.transition(InProgress),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(
            serde_json::to_string(&IssueStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), r#""teacher""#);
        assert_eq!("in_progress".parse::<IssueStatus>().unwrap(), IssueStatus::InProgress);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn user_row_with_unknown_role_is_rejected() {
        let row = UserRow {
            id: 7,
            email: "x@example.com".into(),
            full_name: "X".into(),
            role: "root".into(),
            password_hash: "h".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(matches!(User::try_from(row), Err(AppError::Internal(_))));
    }

    #[test]
    fn page_params_apply_defaults_and_bounds() {
        let defaults = PageParams::default().resolve(1, 50).unwrap();
        assert_eq!(defaults, PageRequest { page: 1, page_size: 50 });
        assert_eq!(defaults.offset(), 0);

        let third = PageParams { page: Some(3), page_size: Some(MAX_PAGE_SIZE) }
            .resolve(1, 50)
            .unwrap();
        assert_eq!(third.page_size, MAX_PAGE_SIZE);
        assert_eq!(third.offset(), 200);

        assert!(PageParams { page: Some(0), page_size: None }.resolve(1, 50).is_err());
        assert!(PageParams { page: None, page_size: Some(0) }.resolve(1, 50).is_err());
    }

    #[test]
    fn page_size_above_cap_is_rejected_not_clamped() {
        let result = PageParams { page: Some(1), page_size: Some(500) }.resolve(1, 50);

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn email_validation() {
        assert_eq!(validate_email("  Ada@Example.EDU ").unwrap(), "ada@example.edu");
        assert!(validate_email("ada").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@localhost").is_err());
        assert!(validate_email("ada@@example.com").is_err());
    }

    #[test]
    fn text_validation_trims_and_bounds() {
        assert_eq!(validate_text("title", "  Leaky tap ", 200).unwrap(), "Leaky tap");
        assert!(validate_text("title", "   ", 200).is_err());
        assert!(validate_text("title", &"x".repeat(201), 200).is_err());
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough").is_ok());
    }

    #[test]
    fn issue_detail_flattens_issue_fields() {
        let detail = IssueDetail {
            issue: Issue {
                id: 1,
                owner_id: 2,
                title: "Broken projector".into(),
                description: "Room 4".into(),
                status: IssueStatus::Open,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            attachments: vec![],
        };

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["title"], "Broken projector");
        assert_eq!(json["status"], "open");
        assert!(json["attachments"].as_array().unwrap().is_empty());
    }
}
