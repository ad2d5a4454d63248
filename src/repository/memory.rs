use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::Repository;
use crate::{
    db::{SessionHandle, run_in_session},
    error::{AppError, AppResult},
    models::{
        Attachment, Issue, IssueChanges, IssueFilter, IssueStatus, NewAttachment, NewIssue,
        NewUser, Page, PageRequest, Role, User, UserChanges,
    },
};

/// The whole store. Sessions work on a clone of it.
#[derive(Clone, Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    issues: BTreeMap<i64, Issue>,
    attachments: BTreeMap<i64, Attachment>,
    last_user_id: i64,
    last_issue_id: i64,
    last_attachment_id: i64,
}

impl Tables {
    fn user(&self, id: i64) -> AppResult<&User> {
        self.users.get(&id).ok_or_else(|| AppError::not_found("user"))
    }

    fn issue_mut(&mut self, id: i64) -> AppResult<&mut Issue> {
        self.issues.get_mut(&id).ok_or_else(|| AppError::not_found("issue"))
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn attachments_of(&self, issue_id: i64) -> Vec<Attachment> {
        self.attachments
            .values()
            .filter(|a| a.issue_id == issue_id)
            .cloned()
            .collect()
    }

    /// Removes the issue and its attachments, returning the attachments.
    fn remove_issue(&mut self, issue_id: i64) -> Vec<Attachment> {
        self.issues.remove(&issue_id);
        let removed = self.attachments_of(issue_id);
        self.attachments.retain(|_, a| a.issue_id != issue_id);
        removed
    }
}

/// MemorySession
///
/// Holds the store lock for the whole session and stages every change on a
/// copy. Commit swaps the copy in; rollback, or dropping the session, discards it.
struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

impl SessionHandle for MemorySession {
    type Conn = Tables;

    fn connection(&mut self) -> &mut Tables {
        &mut self.staged
    }

    async fn commit(mut self) -> Result<(), sqlx::Error> {
        *self.guard = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

/// InMemoryRepository
///
/// A `Repository` kept entirely in process memory. Sessions are serialized
/// through an async mutex, which gives them the same all-or-nothing behaviour
/// as the MySQL transactions. Used by the tests and for running the API
/// without a database.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
    unavailable: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ping` fail, simulating a lost database connection.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    async fn with_session<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Tables) -> BoxFuture<'c, AppResult<T>>,
    {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        run_in_session(MemorySession { guard, staged }, work).await
    }

    /// Runs synchronous `work` as one session.
    async fn session<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> AppResult<T> + Send + 'static,
    {
        self.with_session(move |tables| Box::pin(async move { work(tables) }))
            .await
    }
}

fn page_of<T: Clone>(items: Vec<&T>, page: PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let slice = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect();
    Page::new(slice, page, total)
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn ping(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::internal("database connection unavailable"));
        }
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        self.session(move |t| {
            if t.email_taken(&user.email, None) {
                return Err(AppError::Conflict(
                    "a user with this email already exists".to_string(),
                ));
            }
            t.last_user_id += 1;
            let now = Utc::now();
            let created = User {
                id: t.last_user_id,
                email: user.email,
                full_name: user.full_name,
                role: user.role,
                password_hash: user.password_hash,
                created_at: now,
                updated_at: now,
            };
            t.users.insert(created.id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn find_user(&self, id: i64) -> AppResult<Option<User>> {
        self.session(move |t| Ok(t.users.get(&id).cloned())).await
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_string();
        self.session(move |t| Ok(t.users.values().find(|u| u.email == email).cloned()))
            .await
    }

    async fn list_users(&self, page: PageRequest) -> AppResult<Page<User>> {
        self.session(move |t| Ok(page_of(t.users.values().collect(), page)))
            .await
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> AppResult<User> {
        self.session(move |t| {
            t.user(id)?;
            if let Some(email) = &changes.email {
                if t.email_taken(email, Some(id)) {
                    return Err(AppError::Conflict(
                        "a user with this email already exists".to_string(),
                    ));
                }
            }
            let user = t.users.get_mut(&id).ok_or_else(|| AppError::not_found("user"))?;
            if let Some(email) = changes.email {
                user.email = email;
            }
            if let Some(full_name) = changes.full_name {
                user.full_name = full_name;
            }
            if let Some(password_hash) = changes.password_hash {
                user.password_hash = password_hash;
            }
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
        .await
    }

    async fn set_user_role(&self, id: i64, role: Role) -> AppResult<User> {
        self.session(move |t| {
            let user = t.users.get_mut(&id).ok_or_else(|| AppError::not_found("user"))?;
            user.role = role;
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
        .await
    }

    async fn delete_user(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.session(move |t| {
            t.user(id)?;
            let owned: Vec<i64> = t
                .issues
                .values()
                .filter(|i| i.owner_id == id)
                .map(|i| i.id)
                .collect();
            let removed: Vec<Attachment> = owned
                .into_iter()
                .flat_map(|issue_id| t.remove_issue(issue_id))
                .collect();
            t.users.remove(&id);
            Ok(removed)
        })
        .await
    }

    async fn create_issue(&self, owner_id: i64, issue: NewIssue) -> AppResult<Issue> {
        self.session(move |t| {
            t.user(owner_id)?;
            t.last_issue_id += 1;
            let now = Utc::now();
            let created = Issue {
                id: t.last_issue_id,
                owner_id,
                title: issue.title,
                description: issue.description,
                status: IssueStatus::Open,
                created_at: now,
                updated_at: now,
            };
            t.issues.insert(created.id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn find_issue(&self, id: i64) -> AppResult<Option<Issue>> {
        self.session(move |t| Ok(t.issues.get(&id).cloned())).await
    }

    async fn list_issues(&self, filter: IssueFilter, page: PageRequest) -> AppResult<Page<Issue>> {
        self.session(move |t| {
            // Ids grow with creation time, so reverse id order is newest first.
            let matching = t
                .issues
                .values()
                .rev()
                .filter(|i| filter.owner_id.is_none_or(|owner| i.owner_id == owner))
                .filter(|i| filter.status.is_none_or(|status| i.status == status))
                .collect();
            Ok(page_of(matching, page))
        })
        .await
    }

    async fn update_issue(&self, id: i64, changes: IssueChanges) -> AppResult<Issue> {
        self.session(move |t| {
            let issue = t.issue_mut(id)?;
            if let Some(title) = changes.title {
                issue.title = title;
            }
            if let Some(description) = changes.description {
                issue.description = description;
            }
            issue.updated_at = Utc::now();
            Ok(issue.clone())
        })
        .await
    }

    async fn transition_issue(&self, id: i64, next: IssueStatus) -> AppResult<Issue> {
        self.session(move |t| {
            let issue = t.issue_mut(id)?;
            issue.status = issue.status.transition(next)?;
            issue.updated_at = Utc::now();
            Ok(issue.clone())
        })
        .await
    }

    async fn delete_issue(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.session(move |t| {
            t.issue_mut(id)?;
            Ok(t.remove_issue(id))
        })
        .await
    }

    async fn add_attachment(&self, issue_id: i64, attachment: NewAttachment) -> AppResult<Attachment> {
        self.session(move |t| {
            t.issue_mut(issue_id)?;
            t.last_attachment_id += 1;
            let created = Attachment {
                id: t.last_attachment_id,
                issue_id,
                file_name: attachment.file_name,
                path: attachment.path,
                size_bytes: attachment.size_bytes,
                extension: attachment.extension,
                created_at: Utc::now(),
            };
            t.attachments.insert(created.id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn list_attachments(&self, issue_id: i64) -> AppResult<Vec<Attachment>> {
        self.session(move |t| Ok(t.attachments_of(issue_id))).await
    }

    async fn delete_attachment(&self, issue_id: i64, attachment_id: i64) -> AppResult<Attachment> {
        self.session(move |t| {
            let belongs = t
                .attachments
                .get(&attachment_id)
                .is_some_and(|a| a.issue_id == issue_id);
            if !belongs {
                return Err(AppError::not_found("attachment"));
            }
            t.attachments
                .remove(&attachment_id)
                .ok_or_else(|| AppError::not_found("attachment"))
        })
        .await
    }
}
