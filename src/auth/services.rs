use std::sync::Arc;

use lazy_static::lazy_static;
use tracing::{error, info, instrument, warn};

use crate::auth::{
    password::{self, PasswordError},
    repo::{RepoError, UserRepository},
    repo_types::{AuthenticatedUser, CreatedUser, NewUser, Role},
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user with this email already exists")]
    DuplicateUser,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("user repository: {0}")]
    Repository(#[source] RepoError),
}

impl From<RepoError> for AuthError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::DuplicateEmail => AuthError::DuplicateUser,
            other => AuthError::Repository(other),
        }
    }
}

/// Runs Argon2 on the blocking pool.
pub async fn hash(plain: &str) -> Result<String, PasswordError> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| {
            error!(error = %e, "hash task failed");
            PasswordError::Hashing
        })?
}

pub async fn compare(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let (plain, hash) = (plain.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| {
            error!(error = %e, "compare task failed");
            PasswordError::Comparison
        })?
}

lazy_static! {
    /// Verified against on unknown emails so both failure paths pay for Argon2.
    static ref DUMMY_HASH: Option<String> =
        password::hash_password("authgate-unknown-account").ok();
}

async fn verify_dummy(plain: &str) {
    let plain = plain.to_owned();
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(hash) = DUMMY_HASH.as_deref() {
            let _ = password::verify_password(&plain, hash);
        }
    })
    .await;
}

#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn UserRepository>,
}

impl CredentialService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        let user = match self.users.find_by_email(email).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                verify_dummy(password).await;
                warn!(email = %email, "authentication failed: unknown email");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                error!(error = %e, email = %email, "find_by_email failed");
                return Err(e.into());
            }
        };

        if !compare(password, &user.password_hash).await? {
            warn!(email = %email, user_id = %user.id, "authentication failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(email = %email, user_id = %user.id, "user authenticated");
        Ok(user.into())
    }

    #[instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<CreatedUser, AuthError> {
        match self.users.find_by_email(email).await {
            Ok(Some(_)) => {
                warn!(email = %email, "user already exists");
                return Err(AuthError::DuplicateUser);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, email = %email, "find_by_email failed");
                return Err(e.into());
            }
        }

        let password_hash = hash(password).await?;

        let user = self
            .users
            .insert(NewUser {
                name: name.to_owned(),
                email: email.to_owned(),
                password_hash,
                role,
            })
            .await
            .map_err(|e| {
                error!(error = %e, email = %email, "insert user failed");
                AuthError::from(e)
            })?;

        info!(email = %email, user_id = %user.id, role = %user.role, "user created");
        Ok(user)
    }
}
