use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySql, MySqlConnection, QueryBuilder};

use super::Repository;
use crate::{
    db::Database,
    error::{AppError, AppResult},
    models::{
        Attachment, AttachmentRow, Issue, IssueChanges, IssueFilter, IssueRow, IssueStatus,
        NewAttachment, NewIssue, NewUser, Page, PageRequest, Role, User, UserChanges, UserRow,
    },
};

const USER_COLUMNS: &str = "id, email, full_name, role, password_hash, created_at, updated_at";
const ISSUE_COLUMNS: &str = "id, owner_id, title, description, status, created_at, updated_at";
const ATTACHMENT_COLUMNS: &str = "id, issue_id, file_name, path, size_bytes, extension, created_at";

/// MySqlRepository
///
/// The production `Repository`, backed by MySQL through the session provider in `db`.
#[derive(Clone, Debug)]
pub struct MySqlRepository {
    db: Database,
}

impl MySqlRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

// --- Row Helpers ---
//
// Each helper runs on the connection of an already open session.

async fn fetch_user(conn: &mut MySqlConnection, id: i64) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(User::try_from).transpose()
}

async fn require_user(conn: &mut MySqlConnection, id: i64) -> AppResult<User> {
    fetch_user(conn, id).await?.ok_or_else(|| AppError::not_found("user"))
}

async fn fetch_issue(conn: &mut MySqlConnection, id: i64, for_update: bool) -> AppResult<Option<Issue>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?{lock}"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(Issue::try_from).transpose()
}

async fn require_issue(conn: &mut MySqlConnection, id: i64) -> AppResult<Issue> {
    fetch_issue(conn, id, true)
        .await?
        .ok_or_else(|| AppError::not_found("issue"))
}

async fn fetch_attachments(conn: &mut MySqlConnection, issue_id: i64) -> AppResult<Vec<Attachment>> {
    let rows = sqlx::query_as::<_, AttachmentRow>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE issue_id = ? ORDER BY id"
    ))
    .bind(issue_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Attachment::from).collect())
}

/// Maps a duplicate-key failure on `users.email` to `Conflict`.
fn email_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict("a user with this email already exists".to_string())
        }
        _ => AppError::Persistence(err),
    }
}

fn push_issue_filter(builder: &mut QueryBuilder<'_, MySql>, filter: IssueFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(owner_id) = filter.owner_id {
        builder.push(" AND owner_id = ");
        builder.push_bind(owner_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn ping(&self) -> AppResult<()> {
        Ok(self.db.ping().await?)
    }

    /// create_user
    ///
    /// MySQL has no `RETURNING`, so the row is read back by its generated id
    /// inside the same transaction.
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let result = sqlx::query(
                        "INSERT INTO users (email, full_name, role, password_hash, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&user.email)
                    .bind(&user.full_name)
                    .bind(user.role.as_str())
                    .bind(&user.password_hash)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *conn)
                    .await
                    .map_err(email_conflict)?;

                    require_user(conn, result.last_insert_id() as i64).await
                })
            })
            .await
    }

    async fn find_user(&self, id: i64) -> AppResult<Option<User>> {
        self.db
            .with_session(move |conn| Box::pin(async move { fetch_user(conn, id).await }))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_string();
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, UserRow>(&format!(
                        "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
                    ))
                    .bind(&email)
                    .fetch_optional(&mut *conn)
                    .await?;
                    row.map(User::try_from).transpose()
                })
            })
            .await
    }

    async fn list_users(&self, page: PageRequest) -> AppResult<Page<User>> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                        .fetch_one(&mut *conn)
                        .await?;
                    let rows = sqlx::query_as::<_, UserRow>(&format!(
                        "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT ? OFFSET ?"
                    ))
                    .bind(page.limit())
                    .bind(page.offset())
                    .fetch_all(&mut *conn)
                    .await?;

                    let users = rows
                        .into_iter()
                        .map(User::try_from)
                        .collect::<AppResult<Vec<_>>>()?;
                    Ok(Page::new(users, page, total))
                })
            })
            .await
    }

    /// update_user
    ///
    /// Partial update: `COALESCE` keeps every column whose change is `None`.
    async fn update_user(&self, id: i64, changes: UserChanges) -> AppResult<User> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_user(conn, id).await?;
                    sqlx::query(
                        "UPDATE users SET email = COALESCE(?, email), full_name = COALESCE(?, full_name), \
                         password_hash = COALESCE(?, password_hash), updated_at = ? WHERE id = ?",
                    )
                    .bind(changes.email)
                    .bind(changes.full_name)
                    .bind(changes.password_hash)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                    .map_err(email_conflict)?;

                    require_user(conn, id).await
                })
            })
            .await
    }

    async fn set_user_role(&self, id: i64, role: Role) -> AppResult<User> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_user(conn, id).await?;
                    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
                        .bind(role.as_str())
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    require_user(conn, id).await
                })
            })
            .await
    }

    /// delete_user
    ///
    /// Issues and attachments go with the user through `ON DELETE CASCADE`;
    /// their attachment rows are collected first.
    async fn delete_user(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_user(conn, id).await?;
                    let rows = sqlx::query_as::<_, AttachmentRow>(
                        "SELECT a.id, a.issue_id, a.file_name, a.path, a.size_bytes, a.extension, a.created_at \
                         FROM attachments a JOIN issues i ON i.id = a.issue_id \
                         WHERE i.owner_id = ? ORDER BY a.id",
                    )
                    .bind(id)
                    .fetch_all(&mut *conn)
                    .await?;

                    sqlx::query("DELETE FROM users WHERE id = ?")
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(rows.into_iter().map(Attachment::from).collect())
                })
            })
            .await
    }

    async fn create_issue(&self, owner_id: i64, issue: NewIssue) -> AppResult<Issue> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_user(conn, owner_id).await?;
                    let now = Utc::now();
                    let result = sqlx::query(
                        "INSERT INTO issues (owner_id, title, description, status, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(owner_id)
                    .bind(&issue.title)
                    .bind(&issue.description)
                    .bind(IssueStatus::Open.as_str())
                    .bind(now)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;

                    require_issue(conn, result.last_insert_id() as i64).await
                })
            })
            .await
    }

    async fn find_issue(&self, id: i64) -> AppResult<Option<Issue>> {
        self.db
            .with_session(move |conn| Box::pin(async move { fetch_issue(conn, id, false).await }))
            .await
    }

    /// list_issues
    ///
    /// Builds the filter with `QueryBuilder` so every value is bound, never
    /// interpolated.
    async fn list_issues(&self, filter: IssueFilter, page: PageRequest) -> AppResult<Page<Issue>> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    let mut count: QueryBuilder<MySql> = QueryBuilder::new("SELECT COUNT(*) FROM issues");
                    push_issue_filter(&mut count, filter);
                    let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

                    let mut select: QueryBuilder<MySql> =
                        QueryBuilder::new(format!("SELECT {ISSUE_COLUMNS} FROM issues"));
                    push_issue_filter(&mut select, filter);
                    select.push(" ORDER BY created_at DESC, id DESC LIMIT ");
                    select.push_bind(page.limit());
                    select.push(" OFFSET ");
                    select.push_bind(page.offset());

                    let issues = select
                        .build_query_as::<IssueRow>()
                        .fetch_all(&mut *conn)
                        .await?
                        .into_iter()
                        .map(Issue::try_from)
                        .collect::<AppResult<Vec<_>>>()?;
                    Ok(Page::new(issues, page, total))
                })
            })
            .await
    }

    async fn update_issue(&self, id: i64, changes: IssueChanges) -> AppResult<Issue> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_issue(conn, id).await?;
                    sqlx::query(
                        "UPDATE issues SET title = COALESCE(?, title), description = COALESCE(?, description), \
                         updated_at = ? WHERE id = ?",
                    )
                    .bind(changes.title)
                    .bind(changes.description)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                    require_issue(conn, id).await
                })
            })
            .await
    }

    async fn transition_issue(&self, id: i64, next: IssueStatus) -> AppResult<Issue> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    // Row lock held until commit.
                    let current = require_issue(conn, id).await?;
                    let next = current.status.transition(next)?;

                    sqlx::query("UPDATE issues SET status = ?, updated_at = ? WHERE id = ?")
                        .bind(next.as_str())
                        .bind(Utc::now())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    require_issue(conn, id).await
                })
            })
            .await
    }

    async fn delete_issue(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_issue(conn, id).await?;
                    let attachments = fetch_attachments(conn, id).await?;
                    sqlx::query("DELETE FROM issues WHERE id = ?")
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(attachments)
                })
            })
            .await
    }

    async fn add_attachment(&self, issue_id: i64, attachment: NewAttachment) -> AppResult<Attachment> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    require_issue(conn, issue_id).await?;
                    let result = sqlx::query(
                        "INSERT INTO attachments (issue_id, file_name, path, size_bytes, extension, created_at) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(issue_id)
                    .bind(&attachment.file_name)
                    .bind(&attachment.path)
                    .bind(attachment.size_bytes)
                    .bind(&attachment.extension)
                    .bind(Utc::now())
                    .execute(&mut *conn)
                    .await?;

                    let row = sqlx::query_as::<_, AttachmentRow>(&format!(
                        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?"
                    ))
                    .bind(result.last_insert_id() as i64)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok(Attachment::from(row))
                })
            })
            .await
    }

    async fn list_attachments(&self, issue_id: i64) -> AppResult<Vec<Attachment>> {
        self.db
            .with_session(move |conn| Box::pin(async move { fetch_attachments(conn, issue_id).await }))
            .await
    }

    async fn delete_attachment(&self, issue_id: i64, attachment_id: i64) -> AppResult<Attachment> {
        self.db
            .with_session(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, AttachmentRow>(&format!(
                        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ? AND issue_id = ? FOR UPDATE"
                    ))
                    .bind(attachment_id)
                    .bind(issue_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or_else(|| AppError::not_found("attachment"))?;

                    sqlx::query("DELETE FROM attachments WHERE id = ?")
                        .bind(attachment_id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(Attachment::from(row))
                })
            })
            .await
    }
}
