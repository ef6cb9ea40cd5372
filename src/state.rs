use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::{
        jwt::TokenCodec,
        repo::{PgUserRepository, UserRepository},
        services::CredentialService,
    },
    config::AppConfig,
    security::{DecisionEngine, SecurityState},
};

#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub tokens: TokenCodec,
    pub security: SecurityState,
}

impl AppState {
    pub fn init(config: &AppConfig, db: PgPool, engine: Arc<dyn DecisionEngine>) -> Self {
        let users = Arc::new(PgUserRepository::new(db)) as Arc<dyn UserRepository>;
        Self::from_parts(config, users, engine)
    }

    pub fn from_parts(
        config: &AppConfig,
        users: Arc<dyn UserRepository>,
        engine: Arc<dyn DecisionEngine>,
    ) -> Self {
        Self {
            tokens: TokenCodec::from_config(&config.jwt),
            credentials: CredentialService::new(users),
            security: SecurityState::new(engine, config.security.trust_proxy),
        }
    }
}
