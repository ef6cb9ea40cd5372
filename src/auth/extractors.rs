use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{debug, warn};

use crate::{
    auth::{
        jwt::{Claims, TokenCodec, TokenPayload},
        repo_types::Role,
    },
    error::ApiError,
};

pub const TOKEN_COOKIE: &str = "token";

/// Identity attached to the request once its token has been verified.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims<TokenPayload>);

impl CurrentUser {
    pub fn role(&self) -> Role {
        self.0.payload.role
    }
}

/// Reads `Authorization: Bearer <token>`, falling back to the `token` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| {
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
        });
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE && !value.is_empty()).then_some(value)
        })
}

/// Attaches `CurrentUser` for a valid token; anything else stays anonymous.
pub async fn attach_identity(
    State(codec): State<TokenCodec>,
    mut request: Request,
    next: Next,
) -> Response {
    let verified = token_from_headers(request.headers())
        .map(|token| codec.verify::<TokenPayload>(token));

    match verified {
        Some(Ok(claims)) => {
            debug!(user_id = %claims.payload.id, role = %claims.payload.role, "identity attached");
            request.extensions_mut().insert(CurrentUser(claims));
        }
        Some(Err(_)) => debug!("ignoring invalid token; continuing as guest"),
        None => {}
    }

    next.run(request).await
}

/// Requires a verified identity on the request.
pub struct AuthUser(pub TokenPayload);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .map(|user| AuthUser(user.0.payload.clone()))
            .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))
    }
}

/// `Json<T>` whose rejections render as `ApiError::BadRequest`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                warn!(status = %rejection.status(), "rejected request body: {}", rejection.body_text());
                Err(ApiError::BadRequest(rejection.body_text()))
            }
        }
    }
}
