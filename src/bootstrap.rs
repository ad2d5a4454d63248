use crate::{
    auth::hash_password_blocking,
    config::BootstrapAdmin,
    error::AppResult,
    models::{NewUser, Role, validate_email, validate_password},
    repository::Repository,
};

/// seed_admin
///
/// Creates the configured administrator unless an account with that email
/// already exists. An existing account is left untouched, whatever its role.
/// Returns whether an account was created.
pub async fn seed_admin(repo: &dyn Repository, admin: &BootstrapAdmin) -> AppResult<bool> {
    let email = validate_email(&admin.email)?;
    if let Some(existing) = repo.find_user_by_email(&email).await? {
        if existing.role != Role::Admin {
            tracing::warn!(user_id = existing.id, role = %existing.role, "bootstrap admin email belongs to a non-admin account");
        }
        return Ok(false);
    }

    validate_password(&admin.password)?;
    let password_hash = hash_password_blocking(admin.password.clone()).await?;
    let user = repo
        .create_user(NewUser {
            email,
            full_name: "Administrator".to_string(),
            role: Role::Admin,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = user.id, "bootstrap administrator created");
    Ok(true)
}
