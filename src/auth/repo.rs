use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::repo_types::{CreatedUser, NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence seam for the credential service.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn insert(&self, user: NewUser) -> Result<CreatedUser, RepoError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, created_at
            FROM users
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<CreatedUser, RepoError> {
        sqlx::query_as::<_, CreatedUser>(
            r#"
            INSERT INTO users (name, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, email, role, created_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            // a concurrent sign-up can pass the pre-check; the constraint decides
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::DuplicateEmail,
            other => RepoError::Database(other),
        })
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::{RepoError, UserRepository};
    use crate::auth::repo_types::{CreatedUser, NewUser, User};

    /// Email-keyed store mirroring the unique constraint on `users.email`.
    #[derive(Default)]
    pub(crate) struct InMemoryUsers {
        rows: Mutex<HashMap<String, User>>,
    }

    impl InMemoryUsers {
        pub(crate) async fn get(&self, email: &str) -> Option<User> {
            self.rows.lock().await.get(email).cloned()
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUsers {
        async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
            Ok(self.rows.lock().await.get(email).cloned())
        }

        async fn insert(&self, user: NewUser) -> Result<CreatedUser, RepoError> {
            let mut rows = self.rows.lock().await;
            if rows.contains_key(&user.email) {
                return Err(RepoError::DuplicateEmail);
            }
            let row = User {
                id: Uuid::new_v4(),
                name: user.name,
                email: user.email.clone(),
                password_hash: user.password_hash,
                role: user.role,
                created_at: OffsetDateTime::now_utc(),
            };
            let created = CreatedUser {
                id: row.id,
                name: row.name.clone(),
                email: row.email.clone(),
                role: row.role,
                created_at: row.created_at,
            };
            rows.insert(user.email, row);
            Ok(created)
        }
    }
}
