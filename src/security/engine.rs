//! In-process decision engine: bot and shield heuristics plus
//! sliding-window-log rate limiting keyed by rule and client address.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::debug;

use crate::{
    config::SecurityConfig,
    security::decision::{Decision, DecisionEngine, DenyReason, EngineError, RequestFacts, SlidingWindow},
};

const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scrapy",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "headlesschrome",
    "phantomjs",
];

const ATTACK_SIGNATURES: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e",
    "<script",
    "%3cscript",
    "javascript:",
    "union select",
    "union%20select",
    "' or '1'='1",
    "%27%20or%20",
    "/etc/passwd",
    "${jndi:",
];

#[derive(Debug)]
struct Window {
    interval: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            hits: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) < self.interval {
                break;
            }
            self.hits.pop_front();
        }
    }
}

pub struct LocalDecisionEngine {
    config: SecurityConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl LocalDecisionEngine {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn is_bot(&self, request: &RequestFacts) -> bool {
        match request.user_agent.as_deref().map(str::trim) {
            None | Some("") => self.config.block_missing_user_agent,
            Some(ua) => {
                let ua = ua.to_ascii_lowercase();
                BOT_MARKERS.iter().any(|marker| ua.contains(marker))
            }
        }
    }

    fn is_attack(request: &RequestFacts) -> bool {
        let mut target = request.path.to_ascii_lowercase();
        if let Some(query) = &request.query {
            target.push('?');
            target.push_str(&query.to_ascii_lowercase());
        }
        ATTACK_SIGNATURES.iter().any(|sig| target.contains(sig))
    }

    /// Records the hit when the window has room; a denied hit is not counted.
    async fn admit(&self, key: String, rule: &SlidingWindow) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(key)
            .or_insert_with(|| Window::new(rule.interval));
        window.interval = rule.interval;
        window.prune(now);

        if window.hits.len() >= rule.max as usize {
            return false;
        }
        window.hits.push_back(now);
        true
    }

    /// Drops windows with no hits left inside their interval.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| {
            window.prune(now);
            !window.hits.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "swept idle rate-limit windows");
        }
        removed
    }

    #[cfg(test)]
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[async_trait]
impl DecisionEngine for LocalDecisionEngine {
    async fn protect(
        &self,
        request: &RequestFacts,
        rule: &SlidingWindow,
    ) -> Result<Decision, EngineError> {
        if self.is_bot(request) {
            return Ok(Decision::Deny(DenyReason::Bot));
        }
        if Self::is_attack(request) {
            return Ok(Decision::Deny(DenyReason::Shield));
        }

        let key = format!("{}:{}", rule.name, request.ip);
        if self.admit(key, rule).await {
            Ok(Decision::Allow)
        } else {
            Ok(Decision::Deny(DenyReason::RateLimit))
        }
    }
}
