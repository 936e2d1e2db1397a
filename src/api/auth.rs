use crate::{
    api::{allowed_email, ok, ApiResult},
    auth::AdminOnly,
    db::Database,
};
use axum::{routing::get, Extension, Router};
use serde::Serialize;

#[derive(Serialize)]
struct SessionResponse {
    email: String,
    exp: u64,
    allowed: bool,
}

/// Echoes the token's claims so the admin panel can show who is signed in.
async fn me(
    AdminOnly(claims): AdminOnly,
    Extension(db): Extension<Database>,
) -> ApiResult<SessionResponse> {
    let conn = &mut db.conn().await?;

    let allowed = allowed_email::is_allowed(conn, &claims.email).await?;

    Ok(ok(SessionResponse {
        email: claims.email,
        exp: claims.exp,
        allowed,
    }))
}

pub fn app() -> Router {
    Router::new().route("/auth/me", get(me))
}
