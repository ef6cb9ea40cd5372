use std::time::Duration;

use async_trait::async_trait;

/// Named sliding-window rule evaluated by a decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindow {
    pub name: String,
    pub interval: Duration,
    pub max: u32,
}

/// What the engine gets to see of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Bot,
    Shield,
    RateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("decision engine unavailable: {0}")]
    Unavailable(String),
}

/// Traffic decision capability consumed by the security middleware.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn protect(
        &self,
        request: &RequestFacts,
        rule: &SlidingWindow,
    ) -> Result<Decision, EngineError>;
}
