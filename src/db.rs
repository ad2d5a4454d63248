use std::future::Future;

use futures::future::BoxFuture;
use sqlx::{
    MySql, MySqlConnection, MySqlPool, Transaction,
    mysql::MySqlPoolOptions,
};

use crate::{
    config::DatabaseConfig,
    error::{AppError, AppResult},
};

/// SessionHandle
///
/// One transactional unit of work. `connection` is handed to the work
/// closure; exactly one of `commit` or `rollback` consumes the handle
/// afterwards, and dropping it releases whatever it holds.
pub trait SessionHandle: Send {
    type Conn: Send;

    fn connection(&mut self) -> &mut Self::Conn;

    fn commit(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl<'t> SessionHandle for Transaction<'t, MySql> {
    type Conn = MySqlConnection;

    fn connection(&mut self) -> &mut MySqlConnection {
        self
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Transaction::rollback(self).await
    }
}

/// run_in_session
///
/// Runs `work` against the session's connection, then commits on `Ok` or
/// rolls back on `Err`. A failed rollback is logged and the work's own error
/// is returned; a failed commit becomes `AppError::Persistence`.
pub async fn run_in_session<S, T, F>(mut session: S, work: F) -> AppResult<T>
where
    S: SessionHandle,
    T: Send,
    F: for<'c> FnOnce(&'c mut S::Conn) -> BoxFuture<'c, AppResult<T>>,
{
    let outcome = work(session.connection()).await;

    match outcome {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after {err}");
            }
            Err(err)
        }
    }
}

/// Database
///
/// Process-lifetime handle on the MySQL pool. Constructed once in `main` and
/// passed down explicitly; cloning shares the pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: MySqlPool,
}

impl Database {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Opens the pool. Connections are pinged before being handed out.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .test_before_acquire(true)
            .connect(&config.url())
            .await?;
        tracing::info!(host = %config.host, database = %config.name, "database pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// with_session
    ///
    /// Begins a transaction on a pooled connection and runs `work` inside it
    /// with all-or-nothing semantics.
    pub async fn with_session<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, AppResult<T>>,
    {
        let session = self.pool.begin().await.map_err(AppError::Persistence)?;
        run_in_session(session, work).await
    }

    /// Trivial round trip used by the health endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }

    /// create_schema
    ///
    /// Creates every table that does not exist yet. Existing tables are left
    /// untouched.
    pub async fn create_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("database tables created");
        Ok(())
    }
}

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGINT NOT NULL AUTO_INCREMENT,
        email VARCHAR(255) NOT NULL,
        full_name VARCHAR(255) NOT NULL,
        role VARCHAR(16) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        updated_at DATETIME(6) NOT NULL,
        PRIMARY KEY (id),
        UNIQUE KEY uq_users_email (email)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id BIGINT NOT NULL AUTO_INCREMENT,
        owner_id BIGINT NOT NULL,
        title VARCHAR(200) NOT NULL,
        description TEXT NOT NULL,
        status VARCHAR(16) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        updated_at DATETIME(6) NOT NULL,
        PRIMARY KEY (id),
        KEY idx_issues_owner (owner_id),
        KEY idx_issues_status (status),
        CONSTRAINT fk_issues_owner FOREIGN KEY (owner_id) REFERENCES users (id) ON DELETE CASCADE
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attachments (
        id BIGINT NOT NULL AUTO_INCREMENT,
        issue_id BIGINT NOT NULL,
        file_name VARCHAR(255) NOT NULL,
        path VARCHAR(512) NOT NULL,
        size_bytes BIGINT NOT NULL,
        extension VARCHAR(16) NOT NULL,
        created_at DATETIME(6) NOT NULL,
        PRIMARY KEY (id),
        KEY idx_attachments_issue (issue_id),
        CONSTRAINT fk_attachments_issue FOREIGN KEY (issue_id) REFERENCES issues (id) ON DELETE CASCADE
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
];
