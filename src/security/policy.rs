use std::time::Duration;

use crate::{auth::repo_types::Role, security::decision::SlidingWindow};

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub role: Role,
    pub limit: u32,
    pub message: &'static str,
}

impl RatePolicy {
    pub fn for_role(role: Role) -> Self {
        let (limit, message) = match role {
            Role::Admin => (20, "Admin request limit reached (20 per minute). Slow down!"),
            Role::User => (10, "User request limit reached (10 per minute). Slow down!"),
            Role::Guest => (5, "Guest request limit reached (5 per minute). Slow down!"),
        };
        Self {
            role,
            limit,
            message,
        }
    }

    pub fn rule(&self) -> SlidingWindow {
        SlidingWindow {
            name: format!("{}-rate-limit", self.role),
            interval: WINDOW,
            max: self.limit,
        }
    }
}
