use crate::{
    api::{
        created,
        extract::{Id, Payload},
        list, message, ok, ok_with_message, ApiResult, Created,
    },
    auth::AdminOnly,
    db::Database,
    error::{AppError, AppResult},
    models::Notice,
    schema::*,
    validation::{has_text, not_blank, validate_with},
};
use axum::{
    routing::{get, patch},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::{dsl::not, prelude::*};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use url::Url;
use validator::{Validate, ValidationError};

const DEFAULT_COLOR: &str = "blue";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeResponse {
    #[serde(flatten)]
    notice: Notice,
    is_expired: bool,
    should_display: bool,
}

impl NoticeResponse {
    fn at(notice: Notice, now: DateTime<Utc>) -> Self {
        Self {
            is_expired: notice.is_expired_at(now),
            should_display: notice.should_display_at(now),
            notice,
        }
    }

    fn now(notice: Notice) -> Self {
        Self::at(notice, Utc::now())
    }
}

/// Absolute http(s) links or site-relative paths.
fn is_link(value: &str) -> bool {
    if value.starts_with('/') && !value.starts_with("//") {
        return true;
    }
    Url::parse(value).map_or(false, |url| matches!(url.scheme(), "http" | "https"))
}

/// An empty link means "no link".
fn validate_link(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() || is_link(value) {
        return Ok(());
    }
    let mut err = ValidationError::new("link");
    err.message = Some("must be an http(s) URL or a path".into());
    Err(err)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NoticeRequest {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    title: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 1000))]
    description: Option<String>,
    #[validate(custom(function = "not_blank"))]
    color: Option<String>,
    #[validate(range(min = 0))]
    priority: Option<i32>,
    is_active: Option<bool>,
    expires_at: Option<DateTime<Utc>>,
    #[validate(custom(function = "validate_link"))]
    link: Option<String>,
    #[validate(range(min = 0))]
    order: Option<i32>,
}

impl NoticeRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("title", has_text(&self.title)),
            ("description", has_text(&self.description)),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

async fn list_displayable(Extension(db): Extension<Database>) -> ApiResult<Vec<NoticeResponse>> {
    let conn = &mut db.conn().await?;

    let now = Utc::now();
    let notices = notices::table
        .filter(notices::is_active.eq(true))
        .filter(notices::expires_at.is_null().or(notices::expires_at.gt(now)))
        .order((notices::display_order.asc(), notices::priority.desc()))
        .load::<Notice>(conn)
        .await?;

    Ok(list(
        notices
            .into_iter()
            .map(|notice| NoticeResponse::at(notice, now))
            .filter(|notice| notice.should_display)
            .collect(),
    ))
}

async fn list_all_notices(
    _: AdminOnly,
    Extension(db): Extension<Database>,
) -> ApiResult<Vec<NoticeResponse>> {
    let conn = &mut db.conn().await?;

    let notices = notices::table
        .order((
            notices::display_order.asc(),
            notices::priority.desc(),
            notices::created_at.desc(),
        ))
        .load::<Notice>(conn)
        .await?;

    Ok(list(notices.into_iter().map(NoticeResponse::now).collect()))
}

async fn get_notice(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<NoticeResponse> {
    let conn = &mut db.conn().await?;

    let notice = notices::table
        .find(id)
        .first::<Notice>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Notice"))?;

    Ok(ok(NoticeResponse::now(notice)))
}

async fn create_notice(
    _: AdminOnly,
    Extension(db): Extension<Database>,
    Payload(req): Payload<NoticeRequest>,
) -> Created<NoticeResponse> {
    #[derive(Insertable)]
    #[diesel(table_name = notices)]
    struct NewNotice {
        title: String,
        description: String,
        color: String,
        priority: i32,
        is_active: bool,
        expires_at: Option<DateTime<Utc>>,
        link: Option<String>,
        display_order: i32,
    }

    req.check(true)?;

    let new_notice = NewNotice {
        title: req.title.unwrap_or_default().trim().to_string(),
        description: req.description.unwrap_or_default().trim().to_string(),
        color: req.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        priority: req.priority.unwrap_or(0),
        is_active: req.is_active.unwrap_or(true),
        expires_at: req.expires_at,
        link: req
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        display_order: req.order.unwrap_or(0),
    };

    let conn = &mut db.conn().await?;

    let notice = diesel::insert_into(notices::table)
        .values(new_notice)
        .get_result::<Notice>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    Ok(created(
        NoticeResponse::now(notice),
        "Notice created successfully",
    ))
}

async fn update_notice(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<NoticeRequest>,
) -> ApiResult<NoticeResponse> {
    #[derive(AsChangeset)]
    #[diesel(table_name = notices)]
    struct NoticeChanges {
        title: Option<String>,
        description: Option<String>,
        color: Option<String>,
        priority: Option<i32>,
        is_active: Option<bool>,
        expires_at: Option<DateTime<Utc>>,
        link: Option<String>,
        display_order: Option<i32>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let changes = NoticeChanges {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description.map(|d| d.trim().to_string()),
        color: req.color,
        priority: req.priority,
        is_active: req.is_active,
        expires_at: req.expires_at,
        link: req.link.map(|l| l.trim().to_string()),
        display_order: req.order,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let notice = diesel::update(notices::table.find(id))
        .set(changes)
        .get_result::<Notice>(conn)
        .await
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::not_found("Notice"))?;

    Ok(ok(NoticeResponse::now(notice)))
}

async fn delete_notice(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(notices::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Notice"));
    }

    Ok(message("Notice deleted successfully"))
}

async fn toggle_notice(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<NoticeResponse> {
    let conn = &mut db.conn().await?;

    let notice = diesel::update(notices::table.find(id))
        .set((
            notices::is_active.eq(not(notices::is_active)),
            notices::updated_at.eq(Utc::now()),
        ))
        .get_result::<Notice>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Notice"))?;

    let outcome = if notice.is_active {
        "Notice activated successfully"
    } else {
        "Notice deactivated successfully"
    };
    Ok(ok_with_message(NoticeResponse::now(notice), outcome))
}

pub fn app() -> Router {
    Router::new()
        .route("/notices", get(list_displayable).post(create_notice))
        .route("/notices/all", get(list_all_notices))
        .route(
            "/notices/:id",
            get(get_notice).put(update_notice).delete(delete_notice),
        )
        .route("/notices/:id/toggle", patch(toggle_notice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn links_are_web_urls_or_paths() {
        assert!(is_link("https://comet.dev/hackathon"));
        assert!(is_link("http://localhost:3000/events"));
        assert!(is_link("/events/4"));
        assert!(!is_link("//evil.example/x"));
        assert!(!is_link("javascript:alert(1)"));
        assert!(!is_link("events"));
    }

    #[test]
    fn response_reports_expiry() {
        let now = Utc::now();
        let notice = Notice {
            id: 1,
            title: "Hackathon".to_string(),
            description: "Registrations close soon".to_string(),
            color: "amber".to_string(),
            priority: 2,
            is_active: true,
            expires_at: Some(now - Duration::minutes(5)),
            link: None,
            display_order: 0,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(NoticeResponse::at(notice, now)).unwrap();
        assert_eq!(json["isExpired"], true);
        assert_eq!(json["shouldDisplay"], false);
        assert_eq!(json["isActive"], true);
        assert_eq!(json["order"], 0);
    }

    #[test]
    fn invalid_link_is_a_field_error() {
        let req = NoticeRequest {
            title: Some("Hackathon".to_string()),
            description: Some("Registrations open".to_string()),
            color: None,
            priority: Some(1),
            is_active: None,
            expires_at: None,
            link: Some("ftp://files.comet.dev".to_string()),
            order: None,
        };

        let Err(AppError::Validation(errors)) = req.check(true) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors[0].field, "link");
        assert_eq!(errors[0].message, "link must be an http(s) URL or a path");
        assert!(validate_link("  ").is_ok());
    }
}
