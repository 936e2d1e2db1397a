use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::db::ConnectionError;

static EXPOSE_STACK: AtomicBool = AtomicBool::new(false);

/// Whether internal error details are included in response bodies.
/// Turned on outside production.
pub fn expose_stack_traces(expose: bool) {
    EXPOSE_STACK.store(expose, Ordering::Relaxed);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Cow<'static, str>,
    pub message: String,
}

pub enum AppError {
    InternalServerError(anyhow::Error),
    ResponseStatusError(StatusCode, Cow<'static, str>),
    Validation(Vec<FieldError>),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct AppErrorResponse {
    success: bool,
    message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

impl AppErrorResponse {
    fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors: None,
            stack: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "request failed");
                let mut body = AppErrorResponse::new("Internal Server Error");
                if EXPOSE_STACK.load(Ordering::Relaxed) {
                    body.stack = Some(format!("{err:?}"));
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            AppError::ResponseStatusError(code, s) => {
                (code, Json(AppErrorResponse::new(s))).into_response()
            }
            AppError::Validation(errors) => {
                let message = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut body = AppErrorResponse::new(message);
                body.errors = Some(errors);
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::InternalServerError(e.into())
    }
}

impl AppError {
    pub fn from(code: StatusCode, s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::ResponseStatusError(code, s.into())
    }

    pub fn not_found(what: &'static str) -> AppError {
        AppError::from(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    pub fn bad_request(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::BAD_REQUEST, s)
    }

    pub fn field(field: &'static str, message: impl Into<String>) -> AppError {
        AppError::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    /// The database could not be reached. The cause is logged, not returned.
    pub fn upstream(err: ConnectionError) -> AppError {
        tracing::error!(error = %err, "database unavailable");
        AppError::from(StatusCode::SERVICE_UNAVAILABLE, "database is unavailable")
    }

    /// Translates write failures, turning unique violations into field errors.
    pub fn from_diesel(err: DieselError) -> AppError {
        match err {
            DieselError::NotFound => AppError::from(StatusCode::NOT_FOUND, "resource not found"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                let field = info
                    .table_name()
                    .zip(info.constraint_name())
                    .and_then(|(table, constraint)| field_from_constraint(table, constraint))
                    .unwrap_or_else(|| "value".to_string());
                let message = format!("{field} already exists");
                AppError::Validation(vec![FieldError {
                    field: field.into(),
                    message,
                }])
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                AppError::bad_request("referenced resource does not exist")
            }
            err => AppError::InternalServerError(err.into()),
        }
    }
}

/// `users_email_key` on `users` names the `email` field.
fn field_from_constraint(table: &str, constraint: &str) -> Option<String> {
    constraint
        .strip_prefix(table)?
        .strip_prefix('_')?
        .strip_suffix("_key")
        .map(str::to_string)
}
