use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{config::EnvMode, state::AppState};

/// Failure shapes produced by the user-store collaborator.
#[derive(Debug, Error)]
pub enum StoreFault {
    #[error("invalid {field}: {value}")]
    MalformedId { field: &'static str, value: String },

    #[error("duplicate value: {value}")]
    Duplicate { value: String },

    #[error("validation failed")]
    Validation { messages: Vec<String> },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Uniform error shape every failure is reduced to before presentation.
///
/// `operational` separates expected, user-facing faults (bad input, auth
/// failures) from unexpected internal ones whose detail must not leak in
/// production.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub operational: bool,
    pub cause: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            operational: true,
            cause: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(cause: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Something went wrong!".into(),
            operational: false,
            cause: Some(cause),
        }
    }

    pub fn status_class(&self) -> &'static str {
        if self.status.is_client_error() {
            "fail"
        } else {
            "error"
        }
    }
}

impl From<StoreFault> for AppError {
    fn from(fault: StoreFault) -> Self {
        match fault {
            StoreFault::MalformedId { field, value } => {
                Self::bad_request(format!("Invalid {field}: {value}."))
            }
            StoreFault::Duplicate { value } => Self::bad_request(format!(
                "Duplicate field value: {value}. Please use a different value."
            )),
            StoreFault::Validation { messages } => {
                Self::bad_request(format!("Invalid input data. {}", messages.join(". ")))
            }
            StoreFault::Database(e) => Self::internal(e.into()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::unauthenticated("Your token has expired"),
            _ => Self::unauthenticated("Invalid token!"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // The normalize middleware rebuilds the final body from the error
        // stashed in extensions; the plain body below only survives if that
        // layer is absent.
        let status = self.status;
        let mut res = (status, self.message.clone()).into_response();
        res.extensions_mut().insert(Arc::new(self));
        res
    }
}

/// Catch-all for unmatched routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Cannot find {uri} on this server!"))
}

/// Single exit point for every failure in the system. Handlers never render
/// their own error responses; they return [`AppError`] and this layer decides
/// the final shape.
pub async fn normalize(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let res = next.run(req).await;
    let Some(err) = res.extensions().get::<Arc<AppError>>().cloned() else {
        return res;
    };
    present(&err, &path, state.config.env)
}

fn is_api(path: &str) -> bool {
    path.starts_with("/api")
}

pub fn present(err: &AppError, path: &str, mode: EnvMode) -> Response {
    match mode {
        EnvMode::Development => {
            let detail = err.cause.as_ref().map(|c| format!("{c:?}"));
            if is_api(path) {
                (
                    err.status,
                    Json(json!({
                        "status": err.status_class(),
                        "message": err.message,
                        "error": detail,
                    })),
                )
                    .into_response()
            } else {
                error_page(err.status, &err.message, detail.as_deref())
            }
        }
        EnvMode::Production => {
            if err.operational {
                if is_api(path) {
                    (
                        err.status,
                        Json(json!({
                            "status": err.status_class(),
                            "message": err.message,
                        })),
                    )
                        .into_response()
                } else {
                    error_page(err.status, &err.message, None)
                }
            } else {
                error!(status = %err.status, message = %err.message, cause = ?err.cause, "unexpected error");
                if is_api(path) {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({
                            "status": "error",
                            "message": "Something went wrong!",
                        })),
                    )
                        .into_response()
                } else {
                    error_page(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Please try again later!",
                        None,
                    )
                }
            }
        }
    }
}

fn error_page(status: StatusCode, msg: &str, detail: Option<&str>) -> Response {
    let extra = detail
        .map(|d| format!("<pre>{d}</pre>"))
        .unwrap_or_default();
    let body = format!(
        "<!DOCTYPE html><html><head><title>Something went wrong!</title></head>\
         <body><h1>Something went wrong!</h1><p>{msg}</p>{extra}</body></html>"
    );
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}
