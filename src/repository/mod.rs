use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::AppResult,
    models::{
        Attachment, Issue, IssueChanges, IssueFilter, IssueStatus, NewAttachment, NewIssue,
        NewUser, Page, PageRequest, Role, User, UserChanges,
    },
};

mod memory;
mod mysql;

pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;

/// Repository Trait
///
/// The persistence contract the handlers work against. Every operation runs in
/// exactly one session: it either commits as a whole or leaves no trace.
///
/// Lookups return `Ok(None)` for a missing record; mutations of a missing
/// record fail with `AppError::NotFound`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Trivial round trip to the store, used by `/health`.
    async fn ping(&self) -> AppResult<()>;

    // --- Users ---
    /// Fails with `AppError::Conflict` when the e-mail is already registered.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn find_user(&self, id: i64) -> AppResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn list_users(&self, page: PageRequest) -> AppResult<Page<User>>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> AppResult<User>;
    async fn set_user_role(&self, id: i64, role: Role) -> AppResult<User>;
    /// Removes the user with their issues and attachments. Returns the removed
    /// attachments so their files can be cleaned up.
    async fn delete_user(&self, id: i64) -> AppResult<Vec<Attachment>>;

    // --- Issues ---
    async fn create_issue(&self, owner_id: i64, issue: NewIssue) -> AppResult<Issue>;
    async fn find_issue(&self, id: i64) -> AppResult<Option<Issue>>;
    /// Newest first.
    async fn list_issues(&self, filter: IssueFilter, page: PageRequest) -> AppResult<Page<Issue>>;
    async fn update_issue(&self, id: i64, changes: IssueChanges) -> AppResult<Issue>;
    /// Reads the current status and applies `next` in the same session, so two
    /// concurrent transitions cannot both validate against a stale status.
    async fn transition_issue(&self, id: i64, next: IssueStatus) -> AppResult<Issue>;
    async fn delete_issue(&self, id: i64) -> AppResult<Vec<Attachment>>;

    // --- Attachments ---
    async fn add_attachment(&self, issue_id: i64, attachment: NewAttachment) -> AppResult<Attachment>;
    async fn list_attachments(&self, issue_id: i64) -> AppResult<Vec<Attachment>>;
    async fn delete_attachment(&self, issue_id: i64, attachment_id: i64) -> AppResult<Attachment>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
