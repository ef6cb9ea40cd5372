use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, FromRef, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::{
    auth::{extractors::CurrentUser, repo_types::Role},
    error::ApiError,
    security::{
        decision::{Decision, DecisionEngine, DenyReason, RequestFacts},
        policy::RatePolicy,
    },
    state::AppState,
};

const BOT_MESSAGE: &str = "Bot activity detected. Access denied.";
const SHIELD_MESSAGE: &str = "Request blocked by security policy";
const INTERNAL_MESSAGE: &str = "Something went wrong with security middleware";

#[derive(Clone)]
pub struct SecurityState {
    engine: Arc<dyn DecisionEngine>,
    trust_proxy: bool,
}

impl SecurityState {
    pub fn new(engine: Arc<dyn DecisionEngine>, trust_proxy: bool) -> Self {
        Self {
            engine,
            trust_proxy,
        }
    }
}

impl FromRef<AppState> for SecurityState {
    fn from_ref(state: &AppState) -> Self {
        state.security.clone()
    }
}

impl RequestFacts {
    pub fn from_request(request: &Request, trust_proxy: bool) -> Self {
        Self {
            ip: client_ip(request, trust_proxy),
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            user_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

fn header_ip(request: &Request, name: &str) -> Option<IpAddr> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

/// Peer address of the connection. Behind a trusted proxy the
/// `x-forwarded-for` first hop, then `x-real-ip`, take precedence.
/// Header values that are not IP addresses are ignored.
fn client_ip(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) =
            header_ip(request, "x-forwarded-for").or_else(|| header_ip(request, "x-real-ip"))
        {
            return ip.to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Role-scoped rate limiting plus bot and shield screening.
///
/// Every denial answers 403 with a reason-specific message; engine failures
/// answer 500.
pub async fn security_middleware(
    State(security): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    let role = request
        .extensions()
        .get::<CurrentUser>()
        .map(CurrentUser::role)
        .unwrap_or(Role::Guest);
    let policy = RatePolicy::for_role(role);
    let facts = RequestFacts::from_request(&request, security.trust_proxy);

    let decision = match security.engine.protect(&facts, &policy.rule()).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(error = %e, ip = %facts.ip, path = %facts.path, "security middleware error");
            return ApiError::Internal(INTERNAL_MESSAGE.into()).into_response();
        }
    };

    let user_agent = facts.user_agent.as_deref().unwrap_or("");
    match decision {
        Decision::Allow => next.run(request).await,
        Decision::Deny(DenyReason::Bot) => {
            warn!(ip = %facts.ip, path = %facts.path, user_agent, "bot request blocked");
            ApiError::Forbidden(BOT_MESSAGE.into()).into_response()
        }
        Decision::Deny(DenyReason::Shield) => {
            warn!(
                ip = %facts.ip,
                path = %facts.path,
                user_agent,
                method = %facts.method,
                "shield blocked request"
            );
            ApiError::Forbidden(SHIELD_MESSAGE.into()).into_response()
        }
        Decision::Deny(DenyReason::RateLimit) => {
            warn!(
                ip = %facts.ip,
                path = %facts.path,
                user_agent,
                method = %facts.method,
                role = %role,
                limit = policy.limit,
                "rate limit reached"
            );
            ApiError::Forbidden(policy.message.into()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            extractors::attach_identity,
            jwt::{TokenCodec, TokenPayload},
        },
        config::SecurityConfig,
        security::{
            decision::{EngineError, SlidingWindow},
            engine::LocalDecisionEngine,
        },
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BROWSER: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15";

    fn app(engine: Arc<dyn DecisionEngine>, codec: TokenCodec) -> Router {
        app_with_proxy(engine, codec, false)
    }

    fn app_with_proxy(
        engine: Arc<dyn DecisionEngine>,
        codec: TokenCodec,
        trust_proxy: bool,
    ) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(
                SecurityState::new(engine, trust_proxy),
                security_middleware,
            ))
            .layer(middleware::from_fn_with_state(codec, attach_identity))
    }

    fn codec() -> TokenCodec {
        TokenCodec::new("middleware-secret", time::Duration::days(1))
    }

    fn request(token: Option<&str>, user_agent: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/ping");
        if let Some(ua) = user_agent {
            builder = builder.header(header::USER_AGENT, ua);
        }
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn local_engine() -> Arc<dyn DecisionEngine> {
        Arc::new(LocalDecisionEngine::new(SecurityConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn guest_gets_five_requests_per_minute() {
        let app = app(local_engine(), codec());
        for i in 0..5 {
            let res = app.clone().oneshot(request(None, Some(BROWSER))).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK, "request {i}");
        }
        let res = app.oneshot(request(None, Some(BROWSER))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = body_json(res).await;
        assert_eq!(body["error"], "Forbidden");
        assert_eq!(
            body["message"],
            "Guest request limit reached (5 per minute). Slow down!"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn admin_is_denied_on_twenty_first_request() {
        let codec = codec();
        let token = codec
            .sign(&TokenPayload {
                id: Uuid::new_v4(),
                email: "root@example.com".into(),
                role: Role::Admin,
            })
            .unwrap();
        let app = app(local_engine(), codec);

        for i in 0..20 {
            let res = app
                .clone()
                .oneshot(request(Some(&token), Some(BROWSER)))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "request {i}");
        }
        let res = app.oneshot(request(Some(&token), Some(BROWSER))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(res).await["message"],
            "Admin request limit reached (20 per minute). Slow down!"
        );
    }

    #[tokio::test]
    async fn invalid_token_falls_back_to_guest() {
        let app = app(local_engine(), codec());
        let forged = TokenCodec::new("other-secret", time::Duration::days(1))
            .sign(&TokenPayload {
                id: Uuid::new_v4(),
                email: "x@example.com".into(),
                role: Role::Admin,
            })
            .unwrap();
        for _ in 0..5 {
            let res = app
                .clone()
                .oneshot(request(Some(&forged), Some(BROWSER)))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = app.oneshot(request(Some(&forged), Some(BROWSER))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn bot_and_shield_denials_use_their_messages() {
        let app = app(local_engine(), codec());

        let res = app.clone().oneshot(request(None, Some("curl/8.4.0"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(res).await["message"], BOT_MESSAGE);

        let attack = HttpRequest::builder()
            .uri("/ping?next=%3Cscript%3Ealert(1)%3C/script%3E")
            .header(header::USER_AGENT, BROWSER)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(attack).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(res).await["message"], SHIELD_MESSAGE);
    }

    struct BrokenEngine;

    #[async_trait]
    impl DecisionEngine for BrokenEngine {
        async fn protect(
            &self,
            _request: &RequestFacts,
            _rule: &SlidingWindow,
        ) -> Result<Decision, EngineError> {
            Err(EngineError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn engine_failure_is_internal_error() {
        let app = app(Arc::new(BrokenEngine), codec());
        let res = app.oneshot(request(None, Some(BROWSER))).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(res).await;
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["message"], INTERNAL_MESSAGE);
    }

    fn peer(addr: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(addr.parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn rotating_forwarded_for_does_not_reset_guest_limit() {
        let app = app(local_engine(), codec());
        let mut allowed = 0;
        for i in 0..50u32 {
            let mut req = request(None, Some(BROWSER));
            req.headers_mut().insert(
                "x-forwarded-for",
                format!("10.0.{}.{}", i / 256, i % 256).parse().unwrap(),
            );
            req.extensions_mut().insert(peer("198.51.100.9:41000"));
            let res = app.clone().oneshot(req).await.unwrap();
            if res.status() == StatusCode::OK {
                allowed += 1;
            } else {
                assert_eq!(res.status(), StatusCode::FORBIDDEN);
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn trusted_proxy_limits_per_forwarded_client() {
        let app = app_with_proxy(local_engine(), codec(), true);
        for client in ["203.0.113.7", "203.0.113.8"] {
            for i in 0..6 {
                let mut req = request(None, Some(BROWSER));
                req.headers_mut()
                    .insert("x-forwarded-for", client.parse().unwrap());
                req.extensions_mut().insert(peer("10.0.0.1:443"));
                let res = app.clone().oneshot(req).await.unwrap();
                let expected = if i < 5 { StatusCode::OK } else { StatusCode::FORBIDDEN };
                assert_eq!(res.status(), expected, "{client} request {i}");
            }
        }
    }

    #[test]
    fn client_ip_ignores_forwarded_headers_without_trusted_proxy() {
        let mut req = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, false), "unknown");

        req.extensions_mut().insert(peer("192.0.2.44:5000"));
        assert_eq!(client_ip(&req, false), "192.0.2.44");
    }

    #[test]
    fn client_ip_behind_trusted_proxy() {
        let req = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "203.0.113.7");

        let req = HttpRequest::builder()
            .header("x-forwarded-for", "not-an-ip")
            .header("x-real-ip", "2001:db8::1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "2001:db8::1");

        let mut req = HttpRequest::builder()
            .header("x-forwarded-for", "garbage")
            .header("x-real-ip", "also garbage")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(peer("192.0.2.44:5000"));
        assert_eq!(client_ip(&req, true), "192.0.2.44");
    }
}
