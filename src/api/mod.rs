use axum::{http::StatusCode, routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{borrow::Cow, time::Instant};

use crate::{
    db::{ConnectionState, Database},
    error::AppResult,
};

pub mod achievement;
pub mod allowed_email;
pub mod auth;
pub mod club;
pub mod event;
pub mod extract;
pub mod notice;
pub mod team;
pub mod user;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Cow<'static, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

pub type ApiResult<T> = AppResult<Json<ApiResponse<T>>>;
pub type Created<T> = AppResult<(StatusCode, Json<ApiResponse<T>>)>;

pub fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: None,
        count: None,
    })
}

pub fn ok_with_message<T>(
    data: T,
    message: impl Into<Cow<'static, str>>,
) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: Some(message.into()),
        count: None,
    })
}

pub fn list<T>(items: Vec<T>) -> Json<ApiResponse<Vec<T>>> {
    Json(ApiResponse {
        success: true,
        count: Some(items.len()),
        data: Some(items),
        message: None,
    })
}

pub fn created<T>(data: T, message: &'static str) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok_with_message(data, message))
}

pub fn message(message: &'static str) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        data: None,
        message: Some(message.into()),
        count: None,
    })
}

pub struct Page {
    page: i64,
    limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Clone, Copy)]
pub struct StartedAt(pub Instant);

#[derive(Serialize)]
pub struct HealthResponse {
    success: bool,
    status: &'static str,
    timestamp: DateTime<Utc>,
    uptime: u64,
    database: ConnectionState,
}

/// Liveness check. Reports the cached connection state without dialing.
pub async fn health(
    Extension(db): Extension<Database>,
    Extension(StartedAt(started_at)): Extension<StartedAt>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "ok",
        timestamp: Utc::now(),
        uptime: started_at.elapsed().as_secs(),
        database: db.state().await,
    })
}

pub fn app() -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::app())
        .merge(user::app())
        .merge(club::app())
        .merge(event::app())
        .merge(achievement::app())
        .merge(team::app())
        .merge(notice::app())
        .merge(allowed_email::app())
}
