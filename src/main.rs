use std::{net::SocketAddr, sync::Arc};

mod app;
mod auth;
mod config;
mod db;
mod error;
mod security;
mod state;

use crate::{
    config::AppConfig,
    security::{policy::WINDOW, LocalDecisionEngine},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "authgate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;

    let db = db::connect(&config.database_url).await?;
    db::migrate(&db).await?;

    let engine = Arc::new(LocalDecisionEngine::new(config.security.clone()));
    engine.clone().spawn_sweeper(WINDOW);

    let app_state = AppState::init(&config, db, engine);
    let app = app::build_app(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    app::serve(app, addr).await
}
