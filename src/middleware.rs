//! Request pipeline pieces that sit in front of the routes: CORS negotiation
//! and per-address rate limiting. Both read their settings from request
//! extensions installed in [`crate::app`].

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Requested-With, Accept, Origin";
const PREFLIGHT_MAX_AGE: &str = "86400";

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

pub struct CorsPolicy {
    any: bool,
    origins: HashSet<String>,
    host_suffixes: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: Vec<String>, host_suffixes: Vec<String>) -> Self {
        Self {
            any: origins.iter().any(|o| o == "*"),
            origins: origins
                .into_iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
            host_suffixes: host_suffixes
                .into_iter()
                .map(|s| s.trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        if self.any || self.origins.contains(origin.trim_end_matches('/')) {
            return true;
        }
        if self.host_suffixes.is_empty() {
            return false;
        }

        let Some(host) = Url::parse(origin)
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
        else {
            return false;
        };
        self.host_suffixes.iter().any(|suffix| {
            host == *suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .map_or(false, |rest| rest.ends_with('.'))
        })
    }

    fn apply(
        &self,
        origin: &HeaderValue,
        request_headers: Option<HeaderValue>,
        headers: &mut HeaderMap,
    ) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            request_headers.unwrap_or_else(|| HeaderValue::from_static(ALLOWED_HEADERS)),
        );
    }
}

/// Echoes allowed origins on every response and answers preflights directly.
pub async fn cors(req: Request<Body>, next: Next<Body>) -> Response {
    let policy = req.extensions().get::<Arc<CorsPolicy>>().cloned();
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .filter(|origin| {
            let allowed = origin.to_str().ok().zip(policy.as_ref());
            allowed.map_or(false, |(origin, policy)| policy.allows(origin))
        })
        .cloned();
    let request_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    if let (Some(policy), Some(origin)) = (policy, origin) {
        policy.apply(&origin, request_headers, headers);
        if preflight {
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            );
        }
    }

    response
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    trust_proxy: bool,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, trust_proxy: bool) -> Self {
        Self {
            max,
            window,
            trust_proxy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub async fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max {
            let elapsed = now.saturating_duration_since(window.started);
            return Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        Decision::Allowed {
            remaining: self.max - window.count,
        }
    }

    /// Drops windows that have run out; returns how many are left.
    pub async fn prune(&self) -> usize {
        self.prune_at(Instant::now()).await
    }

    async fn prune_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        windows.len()
    }

    pub fn spawn_pruner(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.window);
            loop {
                interval.tick().await;
                let tracked = self.prune().await;
                tracing::debug!(tracked, "pruned rate limit windows");
            }
        })
    }

    fn client_key<B>(&self, req: &Request<B>) -> String {
        if self.trust_proxy {
            let forwarded = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(client) = forwarded {
                return client.to_string();
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

pub async fn rate_limit(req: Request<Body>, next: Next<Body>) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }
    let Some(limiter) = req.extensions().get::<Arc<RateLimiter>>().cloned() else {
        return next.run(req).await;
    };

    let client = limiter.client_key(&req);
    match limiter.check(&client).await {
        Decision::Allowed { remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(limiter.max()));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => {
            tracing::warn!(%client, path = %req.uri().path(), "rate limit exceeded");
            let mut response =
                AppError::from(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE).into_response();
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        }
    }
}
