use axum::http::StatusCode;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{error, info};

use super::{
    jwt::JwtKeys,
    password,
    repo::UserStore,
    repo_types::User,
};
use crate::{email::Mailer, error::AppError};

/// Minimum accepted password length, shared by signup and both reset paths.
pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_new_password(password: &str, confirm: &str) -> Result<(), AppError> {
    if password != confirm {
        return Err(AppError::bad_request("Passwords are not the same"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("Password too short"));
    }
    Ok(())
}

/// Stores a hashed single-use token against the account and emails the
/// plaintext. A token that could not be delivered must not stay valid, so a
/// failed send clears the fields again before reporting the fault.
pub async fn request_password_reset(
    store: &dyn UserStore,
    mailer: &dyn Mailer,
    origin: &str,
    email: &str,
    ttl_minutes: i64,
) -> Result<(), AppError> {
    let user = store
        .find_by_email(email)
        .await?
        .ok_or_else(|| AppError::not_found("There is no user with that email"))?;

    let token = password::generate_reset_token();
    let digest = password::hash_reset_token(&token);
    let expires = OffsetDateTime::now_utc() + TimeDuration::minutes(ttl_minutes);

    store
        .set_reset_token(user.id, Some(&digest), Some(expires))
        .await?;

    let url = format!("{origin}/api/v1/users/reset-password/{token}");
    if let Err(e) = mailer.send_password_reset(&user, &url).await {
        error!(error = %e, user_id = %user.id, "reset email failed, clearing token");
        store.set_reset_token(user.id, None, None).await?;
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "There was an error sending the email. Please try again later.",
        ));
    }

    info!(user_id = %user.id, "password reset email sent");
    Ok(())
}

/// Consumes a reset token: matches its digest against an unexpired record,
/// rewrites the password and issues a fresh session.
pub async fn reset_password(
    store: &dyn UserStore,
    keys: &JwtKeys,
    token: &str,
    new_password: &str,
    confirm: &str,
) -> Result<(String, User), AppError> {
    check_new_password(new_password, confirm)?;

    let digest = password::hash_reset_token(token);
    let user = store
        .find_by_reset_token(&digest, OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| AppError::bad_request("Token is invalid or expired"))?;

    let hash = password::hash_password(new_password).map_err(AppError::internal)?;
    store
        .set_password(user.id, &hash, OffsetDateTime::now_utc())
        .await?;

    let session = keys.sign(user.id).map_err(AppError::internal)?;
    info!(user_id = %user.id, "password reset consumed");
    Ok((session, user))
}

/// Changes the password of an authenticated user; the fresh session replaces
/// every token issued before the change.
pub async fn update_password(
    store: &dyn UserStore,
    keys: &JwtKeys,
    user: &User,
    current: &str,
    new_password: &str,
    confirm: &str,
) -> Result<String, AppError> {
    let ok = password::verify_password(current, &user.password_hash).map_err(AppError::internal)?;
    if !ok {
        return Err(AppError::unauthenticated("Your current password is wrong"));
    }

    check_new_password(new_password, confirm)?;

    let hash = password::hash_password(new_password).map_err(AppError::internal)?;
    store
        .set_password(user.id, &hash, OffsetDateTime::now_utc())
        .await?;

    let session = keys.sign(user.id).map_err(AppError::internal)?;
    info!(user_id = %user.id, "password updated");
    Ok(session)
}
