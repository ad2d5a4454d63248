use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use issue_desk::{
    AppConfig, AppError, AppResult, AppState, InMemoryRepository, MockFileStore, create_router,
    auth::{Identity, TokenKind},
    handlers::{self, ValidJson, ValidPath, ValidQuery},
    models::{
        Attachment, CreateIssueRequest, Issue, IssueChanges, IssueFilter, IssueListParams,
        IssueStatus, NewAttachment, NewIssue, NewUser, Page, PageRequest, Role, UpdateRoleRequest,
        UpdateStatusRequest, User, UserChanges,
    },
    repository::{Repository, RepositoryState},
    storage::FileStoreState,
};
use std::sync::Arc;
use tower::util::ServiceExt;

// --- Test Repository ---

/// Delegates to an in-memory store but refuses to record attachments, so the
/// upload path has to clean up the file it already wrote.
#[derive(Default)]
struct RejectingAttachments {
    inner: InMemoryRepository,
}

#[async_trait]
impl Repository for RejectingAttachments {
    async fn ping(&self) -> AppResult<()> {
        self.inner.ping().await
    }
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        self.inner.create_user(user).await
    }
    async fn find_user(&self, id: i64) -> AppResult<Option<User>> {
        self.inner.find_user(id).await
    }
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }
    async fn list_users(&self, page: PageRequest) -> AppResult<Page<User>> {
        self.inner.list_users(page).await
    }
    async fn update_user(&self, id: i64, changes: UserChanges) -> AppResult<User> {
        self.inner.update_user(id, changes).await
    }
    async fn set_user_role(&self, id: i64, role: Role) -> AppResult<User> {
        self.inner.set_user_role(id, role).await
    }
    async fn delete_user(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.inner.delete_user(id).await
    }
    async fn create_issue(&self, owner_id: i64, issue: NewIssue) -> AppResult<Issue> {
        self.inner.create_issue(owner_id, issue).await
    }
    async fn find_issue(&self, id: i64) -> AppResult<Option<Issue>> {
        self.inner.find_issue(id).await
    }
    async fn list_issues(&self, filter: IssueFilter, page: PageRequest) -> AppResult<Page<Issue>> {
        self.inner.list_issues(filter, page).await
    }
    async fn update_issue(&self, id: i64, changes: IssueChanges) -> AppResult<Issue> {
        self.inner.update_issue(id, changes).await
    }
    async fn transition_issue(&self, id: i64, next: IssueStatus) -> AppResult<Issue> {
        self.inner.transition_issue(id, next).await
    }
    async fn delete_issue(&self, id: i64) -> AppResult<Vec<Attachment>> {
        self.inner.delete_issue(id).await
    }
    async fn add_attachment(&self, _issue_id: i64, _attachment: NewAttachment) -> AppResult<Attachment> {
        Err(AppError::internal("attachments table unavailable"))
    }
    async fn list_attachments(&self, issue_id: i64) -> AppResult<Vec<Attachment>> {
        self.inner.list_attachments(issue_id).await
    }
    async fn delete_attachment(&self, issue_id: i64, attachment_id: i64) -> AppResult<Attachment> {
        self.inner.delete_attachment(issue_id, attachment_id).await
    }
}

// --- Helpers ---

fn state_with(repo: RepositoryState, files: FileStoreState) -> AppState {
    AppState::new(AppConfig::default(), repo, files)
}

async fn seed_user(repo: &dyn Repository, email: &str, role: Role) -> Identity {
    let user = repo
        .create_user(NewUser {
            email: email.to_string(),
            full_name: "Seeded".to_string(),
            role,
            password_hash: "not-a-real-hash".to_string(),
        })
        .await
        .unwrap();
    Identity {
        user_id: user.id,
        role,
    }
}

fn png_upload(state: &AppState, identity: Identity, issue_id: i64) -> Request<Body> {
    let token = state
        .jwt
        .issue(identity.user_id, identity.role, TokenKind::Access, Utc::now())
        .unwrap();
    let body = "--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\n\r\nfake-png\r\n--b--\r\n";
    Request::builder()
        .method("POST")
        .uri(format!("/issue/{issue_id}/attachments"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=b")
        .body(Body::from(body))
        .unwrap()
}

// --- Tests ---

#[tokio::test]
async fn create_issue_sets_owner_and_open_status() {
    let repo = Arc::new(InMemoryRepository::new());
    let state = state_with(repo.clone(), Arc::new(MockFileStore::new()));
    let identity = seed_user(repo.as_ref(), "ada@example.edu", Role::Student).await;

    let (status, Json(issue)) = handlers::issue::create_issue(
        identity,
        State(state),
        ValidJson(CreateIssueRequest {
            title: "Broken heater".to_string(),
            description: "Room 12 is freezing".to_string(),
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(issue.owner_id, identity.user_id);
    assert_eq!(issue.status, IssueStatus::Open);
}

#[tokio::test]
async fn list_issues_rejects_page_zero() {
    let repo = Arc::new(InMemoryRepository::new());
    let state = state_with(repo.clone(), Arc::new(MockFileStore::new()));
    let identity = seed_user(repo.as_ref(), "tim@example.edu", Role::Teacher).await;

    let result = handlers::issue::list_issues(
        identity,
        State(state),
        ValidQuery(IssueListParams {
            page: Some(0),
            page_size: None,
            status: None,
        }),
    )
    .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn status_change_by_another_student_is_forbidden() {
    let repo = Arc::new(InMemoryRepository::new());
    let state = state_with(repo.clone(), Arc::new(MockFileStore::new()));
    let owner = seed_user(repo.as_ref(), "ada@example.edu", Role::Student).await;
    let other = seed_user(repo.as_ref(), "bob@example.edu", Role::Student).await;
    let issue = repo
        .create_issue(
            owner.user_id,
            NewIssue {
                title: "Loose rail".to_string(),
                description: "Stairwell B".to_string(),
            },
        )
        .await
        .unwrap();

    let result = handlers::issue::update_status(
        other,
        State(state),
        ValidPath(issue.id),
        ValidJson(UpdateStatusRequest {
            status: IssueStatus::InProgress,
        }),
    )
    .await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
    let unchanged = repo.find_issue(issue.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, IssueStatus::Open);
}

#[tokio::test]
async fn admin_cannot_change_own_role() {
    let repo = Arc::new(InMemoryRepository::new());
    let state = state_with(repo.clone(), Arc::new(MockFileStore::new()));
    let admin = seed_user(repo.as_ref(), "root@example.edu", Role::Admin).await;

    let result = handlers::user::update_role(
        admin,
        State(state),
        ValidPath(admin.user_id),
        ValidJson(UpdateRoleRequest { role: Role::Student }),
    )
    .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn upload_removes_file_when_row_cannot_be_recorded() {
    let repo = Arc::new(RejectingAttachments::default());
    let files = Arc::new(MockFileStore::new());
    let state = state_with(repo.clone(), files.clone());
    let owner = seed_user(repo.as_ref(), "ada@example.edu", Role::Student).await;
    let issue = repo
        .create_issue(
            owner.user_id,
            NewIssue {
                title: "Mould".to_string(),
                description: "Bathroom ceiling".to_string(),
            },
        )
        .await
        .unwrap();

    let request = png_upload(&state, owner, issue.id);
    let response = create_router(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(files.is_empty());
}

#[tokio::test]
async fn storage_failure_records_nothing() {
    let repo = Arc::new(InMemoryRepository::new());
    let state = state_with(repo.clone(), Arc::new(MockFileStore::new_failing()));
    let owner = seed_user(repo.as_ref(), "ada@example.edu", Role::Student).await;
    let issue = repo
        .create_issue(
            owner.user_id,
            NewIssue {
                title: "Mould".to_string(),
                description: "Bathroom ceiling".to_string(),
            },
        )
        .await
        .unwrap();

    let request = png_upload(&state, owner, issue.id);
    let response = create_router(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(repo.list_attachments(issue.id).await.unwrap().is_empty());
}
