use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, MessageResponse, SignInRequest, SignUpRequest},
        extractors::{AuthUser, JsonBody, TOKEN_COOKIE},
        jwt::{TokenCodec, TokenPayload},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/me", get(me))
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{TOKEN_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}")
}

fn issue(codec: &TokenCodec, payload: &TokenPayload) -> Result<String, ApiError> {
    let token = codec.sign(payload)?;
    Ok(session_cookie(&token, codec.ttl().whole_seconds()))
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.validate()?;
    let user = state
        .credentials
        .create_user(
            &payload.name,
            &payload.email,
            &payload.password,
            payload.role.unwrap_or_default(),
        )
        .await?;

    let cookie = issue(
        &state.tokens,
        &TokenPayload {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
        },
    )?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            message: "User registered",
            user,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = payload.validate()?;
    let user = state
        .credentials
        .authenticate(&payload.email, &payload.password)
        .await?;

    let cookie = issue(
        &state.tokens,
        &TokenPayload {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
        },
    )?;

    info!(user_id = %user.id, email = %user.email, "user signed in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            message: "User signed in successfully",
            user,
        }),
    ))
}

pub async fn sign_out() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(MessageResponse {
            message: "User signed out successfully",
        }),
    )
}

pub async fn me(AuthUser(user): AuthUser) -> Json<TokenPayload> {
    Json(user)
}
