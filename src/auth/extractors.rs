use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use tracing::warn;

use super::{
    cookie,
    jwt::JwtKeys,
    repo_types::{Role, User},
};
use crate::{error::AppError, state::AppState};

/// Resolved account for a protected route.
#[derive(Debug)]
pub struct CurrentUser(pub User);

fn bearer_token(parts: &Parts) -> Option<String> {
    let auth = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|t| t.to_string())
}

async fn resolve_user(parts: &Parts, state: &AppState) -> Result<User, AppError> {
    let token = bearer_token(parts)
        .or_else(|| cookie::parse_session_cookie(&parts.headers))
        .ok_or_else(|| AppError::unauthenticated("You are not logged in!"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify(&token)?;

    // The signature alone is not enough: the account must still exist and
    // the password must not have changed since the token was issued.
    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthenticated("The token bearer no longer exists"))?;

    if user.changed_password_after(claims.iat) {
        return Err(AppError::unauthenticated(
            "You have recently changed password. Log in again!",
        ));
    }

    Ok(user)
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match resolve_user(parts, state).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(e) => {
                warn!(status = %e.status, "authentication failed");
                Err(e)
            }
        }
    }
}

/// Same checks as [`CurrentUser`] but never rejects; pages render for both
/// logged-in and anonymous visitors.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_user(parts, state).await.ok()))
    }
}

/// Role gate for handlers behind [`CurrentUser`].
pub fn authorize(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "You are not authorized to perform this action",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{user_with_password, MemoryUserStore};
    use crate::state::AppState;
    use axum::http::{Request, StatusCode};
    use jsonwebtoken::{encode, Header};
    use std::sync::Arc;
    use time::{Duration as TimeDuration, OffsetDateTime};
    use uuid::Uuid;

    fn parts_with(headers: &[(&str, String)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/users/me");
        for (k, v) in headers {
            builder = builder.header(*k, v.as_str());
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn state_with_user(user: User) -> AppState {
        AppState::fake_with_store(Arc::new(MemoryUserStore::seeded(vec![user])))
    }

    #[tokio::test]
    async fn bearer_token_resolves_user() {
        let user = user_with_password("ava@example.com", "hash");
        let user_id = user.id;
        let state = state_with_user(user);
        let token = JwtKeys::from_ref(&state).sign(user_id).unwrap();
        let mut parts = parts_with(&[("authorization", format!("Bearer {token}"))]);

        let CurrentUser(resolved) = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .expect("authenticated");
        assert_eq!(resolved.id, user_id);
    }

    #[tokio::test]
    async fn cookie_resolves_user() {
        let user = user_with_password("ava@example.com", "hash");
        let user_id = user.id;
        let state = state_with_user(user);
        let token = JwtKeys::from_ref(&state).sign(user_id).unwrap();
        let mut parts = parts_with(&[("cookie", format!("trailhead_session={token}"))]);

        let CurrentUser(resolved) = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .expect("authenticated");
        assert_eq!(resolved.id, user_id);
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated() {
        let state = state_with_user(user_with_password("ava@example.com", "hash"));
        let mut parts = parts_with(&[]);

        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "You are not logged in!");
    }

    #[tokio::test]
    async fn deleted_user_is_unauthenticated() {
        let state = state_with_user(user_with_password("ava@example.com", "hash"));
        let token = JwtKeys::from_ref(&state).sign(Uuid::new_v4()).unwrap();
        let mut parts = parts_with(&[("authorization", format!("Bearer {token}"))]);

        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "The token bearer no longer exists");
    }

    #[tokio::test]
    async fn token_issued_before_password_change_is_rejected() {
        let mut user = user_with_password("ava@example.com", "hash");
        user.password_changed_at = Some(OffsetDateTime::now_utc());
        let user_id = user.id;
        let state = state_with_user(user);

        // Hand-craft a token issued an hour before the change.
        let keys = JwtKeys::from_ref(&state);
        let now = OffsetDateTime::now_utc();
        let claims = crate::auth::jwt::Claims {
            sub: user_id,
            iat: (now - TimeDuration::hours(1)).unix_timestamp() as usize,
            exp: (now + TimeDuration::days(1)).unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();
        let mut parts = parts_with(&[("authorization", format!("Bearer {token}"))]);

        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "You have recently changed password. Log in again!");
    }

    #[tokio::test]
    async fn expired_token_is_rejected_with_expiry_message() {
        let user = user_with_password("ava@example.com", "hash");
        let user_id = user.id;
        let state = state_with_user(user);

        let keys = JwtKeys::from_ref(&state);
        let now = OffsetDateTime::now_utc();
        let claims = crate::auth::jwt::Claims {
            sub: user_id,
            iat: (now - TimeDuration::hours(2)).unix_timestamp() as usize,
            exp: (now - TimeDuration::hours(1)).unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).unwrap();
        let mut parts = parts_with(&[("authorization", format!("Bearer {token}"))]);

        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "Your token has expired");
    }

    #[tokio::test]
    async fn maybe_user_swallows_every_failure() {
        let state = state_with_user(user_with_password("ava@example.com", "hash"));

        let mut parts = parts_with(&[]);
        let MaybeUser(none) = MaybeUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(none.is_none());

        let mut parts = parts_with(&[("cookie", "trailhead_session=logged_out".to_string())]);
        let MaybeUser(none) = MaybeUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn maybe_user_resolves_valid_session() {
        let user = user_with_password("ava@example.com", "hash");
        let user_id = user.id;
        let state = state_with_user(user);
        let token = JwtKeys::from_ref(&state).sign(user_id).unwrap();
        let mut parts = parts_with(&[("cookie", format!("trailhead_session={token}"))]);

        let MaybeUser(some) = MaybeUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(some.map(|u| u.id), Some(user_id));
    }

    #[test]
    fn authorize_checks_role_membership() {
        let mut user = user_with_password("ava@example.com", "hash");
        user.role = Role::User;
        let err = authorize(&user, &[Role::Admin]).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        user.role = Role::Admin;
        assert!(authorize(&user, &[Role::Admin]).is_ok());
        assert!(authorize(&user, &[Role::Admin, Role::LeadGuide]).is_ok());
    }
}
