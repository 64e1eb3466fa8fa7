use axum::{
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{
    cookie,
    dto::{
        AuthResponse, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SignupRequest,
        UpdatePasswordRequest,
    },
    extractors::CurrentUser,
    jwt::JwtKeys,
    password,
    repo_types::{NewUser, User},
    services::{self, is_valid_email, MIN_PASSWORD_LEN},
};
use crate::{
    error::{AppError, StoreFault},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/forgot-password", post(forgot_password))
        .route("/users/reset-password/:token", patch(reset_password))
        .route("/users/update-my-password", patch(update_password))
}

/// Origin for links we email back to the requester; behind a proxy the
/// forwarded proto decides the scheme.
fn request_origin(headers: &HeaderMap) -> String {
    let proto = if cookie::wants_secure(headers) {
        "https"
    } else {
        "http"
    };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{proto}://{host}")
}

/// Attaches an issued session as a cookie alongside the JSON body.
fn attach_session(
    state: &AppState,
    headers: &HeaderMap,
    token: String,
    user: User,
    status: StatusCode,
) -> (StatusCode, HeaderMap, Json<AuthResponse>) {
    let mut out = HeaderMap::new();
    out.insert(
        header::SET_COOKIE,
        cookie::session_cookie(
            &token,
            cookie::wants_secure(headers),
            state.config.jwt.cookie_ttl_days,
        ),
    );

    info!(user_id = %user.id, "session issued");
    (
        status,
        out,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    )
}

/// Signs a fresh session for the user and attaches it.
fn session_response(
    state: &AppState,
    headers: &HeaderMap,
    user: User,
    status: StatusCode,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AppError> {
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(user.id).map_err(AppError::internal)?;
    Ok(attach_session(state, headers, token, user, status))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AppError> {
    payload.email = payload.email.trim().to_lowercase();

    let mut problems = Vec::new();
    if payload.name.trim().is_empty() {
        problems.push("Please tell us your name".to_string());
    }
    if !is_valid_email(&payload.email) {
        problems.push("Please provide a valid email".to_string());
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        problems.push("Password too short".to_string());
    }
    if payload.password != payload.password_confirm {
        problems.push("Passwords are not the same".to_string());
    }
    if !problems.is_empty() {
        warn!(email = %payload.email, "signup validation failed");
        return Err(StoreFault::Validation { messages: problems }.into());
    }

    let hash = password::hash_password(&payload.password).map_err(AppError::internal)?;
    let user = state
        .store
        .create(NewUser {
            name: payload.name.trim().to_string(),
            email: payload.email.clone(),
            password_hash: hash,
        })
        .await?;

    // The welcome email is a courtesy; a provider fault must not undo signup.
    let url = format!("{}/me", request_origin(&headers));
    if let Err(e) = state.mailer.send_welcome(&user, &url).await {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    info!(user_id = %user.id, email = %user.email, "user signed up");
    session_response(&state, &headers, user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AppError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("Please provide email and password"));
    }

    let user = state
        .store
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(|| AppError::unauthenticated("Incorrect email or password"))?;

    let ok = password::verify_password(&payload.password, &user.password_hash)
        .map_err(AppError::internal)?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthenticated("Incorrect email or password"));
    }

    info!(user_id = %user.id, "user logged in");
    session_response(&state, &headers, user, StatusCode::OK)
}

#[instrument]
pub async fn logout() -> (HeaderMap, Json<serde_json::Value>) {
    let mut out = HeaderMap::new();
    out.insert(header::SET_COOKIE, cookie::logout_cookie());
    (out, Json(json!({ "status": "success" })))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let origin = request_origin(&headers);
    services::request_password_reset(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &origin,
        payload.email.trim().to_lowercase().as_str(),
        state.config.reset_ttl_minutes,
    )
    .await?;

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent. Please check your email.",
    })))
}

#[instrument(skip(state, payload, token))]
pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AppError> {
    let keys = JwtKeys::from_ref(&state);
    let (session, user) = services::reset_password(
        state.store.as_ref(),
        &keys,
        &token,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;

    Ok(attach_session(&state, &headers, session, user, StatusCode::OK))
}

#[instrument(skip(state, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<(StatusCode, HeaderMap, Json<AuthResponse>), AppError> {
    let keys = JwtKeys::from_ref(&state);
    let session = services::update_password(
        state.store.as_ref(),
        &keys,
        &user,
        &payload.password_current,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;

    // Re-read so the response carries the fresh password_changed_at stamp.
    let user = state
        .store
        .find_by_id(user.id)
        .await?
        .ok_or_else(|| AppError::unauthenticated("The token bearer no longer exists"))?;

    Ok(attach_session(&state, &headers, session, user, StatusCode::OK))
}
