use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::PublicUser,
        extractors::{authorize, CurrentUser},
        repo_types::Role,
        services::is_valid_email,
    },
    error::{AppError, StoreFault},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/update-me", patch(update_me))
        .route("/users/delete-me", delete(delete_me))
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    // Present only to catch misuse; password changes have their own route.
    pub password: Option<String>,
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<PublicUser>, AppError> {
    if payload.password.is_some() {
        return Err(AppError::bad_request(
            "This route is not for password updates. Please use /update-my-password",
        ));
    }

    let email = payload.email.map(|e| e.trim().to_lowercase());
    if let Some(e) = &email {
        if !is_valid_email(e) {
            return Err(StoreFault::Validation {
                messages: vec!["Please provide a valid email".to_string()],
            }
            .into());
        }
    }

    let updated = state
        .store
        .update_profile(user.id, payload.name.as_deref(), email.as_deref())
        .await?;

    info!(user_id = %updated.id, "profile updated");
    Ok(Json(updated.into()))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.store.deactivate(user.id).await?;
    info!(user_id = %user.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    authorize(&user, &[Role::Admin])?;

    let users = state.store.list().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, AppError> {
    authorize(&user, &[Role::Admin])?;

    let id = Uuid::parse_str(&id).map_err(|_| {
        warn!(value = %id, "malformed user id");
        StoreFault::MalformedId { field: "id", value: id.clone() }
    })?;

    let found = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("No user found with that ID"))?;

    Ok(Json(found.into()))
}
