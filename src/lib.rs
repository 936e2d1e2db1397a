use std::{any::Any, io, sync::Arc, time::Instant};

use axum::{
    handler::Handler,
    http::{header, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, get_service},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod schema;
pub mod validation;

use crate::{
    auth::Keys,
    config::Config,
    db::Database,
    error::AppError,
    middleware::{CorsPolicy, RateLimiter},
};

/// Everything the router needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub keys: Arc<Keys>,
    pub cors: Arc<CorsPolicy>,
    pub limiter: Arc<RateLimiter>,
    pub uploads_dir: String,
    pub api_version: String,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<AppState> {
        config.validate()?;
        error::expose_stack_traces(!config.is_production());

        Ok(AppState {
            db: Database::new(
                &config.database_url,
                config.db_pool_size,
                config.db_connect_timeout(),
            ),
            keys: Arc::new(Keys::new(&config.jwt_secret)?),
            cors: Arc::new(CorsPolicy::new(
                config.cors_origins(),
                config.cors_origin_suffixes(),
            )),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_max,
                config.rate_limit_window(),
                config.trust_proxy,
            )),
            uploads_dir: config.uploads_dir.clone(),
            api_version: config.api_version.clone(),
        })
    }
}

pub fn app(state: &AppState) -> Router {
    let uploads = get_service(ServeDir::new(&state.uploads_dir)).handle_error(handle_error);

    let routes = Router::new()
        .route("/health", get(api::health))
        .nest(&format!("/api/{}", state.api_version), api::app())
        .nest("/uploads", uploads)
        .fallback(not_found.into_service());

    with_middleware(routes, state)
}

fn with_middleware(routes: Router, state: &AppState) -> Router {
    routes.layer(
        ServiceBuilder::new()
            .layer(Extension(state.db.clone()))
            .layer(Extension(state.keys.clone()))
            .layer(Extension(state.cors.clone()))
            .layer(Extension(state.limiter.clone()))
            .layer(Extension(api::StartedAt(Instant::now())))
            .layer(axum::middleware::from_fn(middleware::cors))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_DNS_PREFETCH_CONTROL,
                HeaderValue::from_static("off"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=15552000; includeSubDomains"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static("cross-origin-resource-policy"),
                HeaderValue::from_static("cross-origin"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::X_XSS_PROTECTION,
                HeaderValue::from_static("0"),
            ))
            .layer(axum::middleware::from_fn(middleware::rate_limit))
            .layer(CompressionLayer::new())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CatchPanicLayer::custom(handle_panic)),
    )
}

async fn not_found(uri: Uri) -> AppError {
    AppError::from(
        StatusCode::NOT_FOUND,
        format!("Route {} not found", uri.path()),
    )
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = details, "request handler panicked");

    AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

async fn handle_error(err: io::Error) -> AppError {
    tracing::error!(error = %err, "failed to serve upload");
    AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch upload")
}
