use crate::{
    api::{
        created,
        extract::{Id, Payload},
        list, message, ok, ApiResult, Created,
    },
    auth::AdminOnly,
    db::Database,
    error::{AppError, AppResult},
    models::AllowedEmail,
    schema::*,
    validation::{has_text, validate_with},
};
use axum::{
    extract::Path,
    routing::{delete, get},
    Extension, Router,
};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn is_allowed(conn: &mut AsyncPgConnection, email: &str) -> AppResult<bool> {
    Ok(diesel::select(diesel::dsl::exists(
        allowed_emails::table.filter(allowed_emails::email.eq(normalize(email))),
    ))
    .get_result::<bool>(conn)
    .await?)
}

#[derive(Serialize)]
struct EmailCheck {
    email: String,
    allowed: bool,
}

#[derive(Deserialize, Validate)]
struct AllowedEmailRequest {
    #[validate(email)]
    email: Option<String>,
    #[validate(length(max = 200))]
    note: Option<String>,
}

impl AllowedEmailRequest {
    fn check(&self) -> AppResult<()> {
        validate_with(self, &[("email", has_text(&self.email))])
    }
}

async fn list_allowed(
    _: AdminOnly,
    Extension(db): Extension<Database>,
) -> ApiResult<Vec<AllowedEmail>> {
    let conn = &mut db.conn().await?;

    let emails = allowed_emails::table
        .order(allowed_emails::created_at.desc())
        .load::<AllowedEmail>(conn)
        .await?;

    Ok(list(emails))
}

async fn check_email(
    Path(email): Path<String>,
    Extension(db): Extension<Database>,
) -> ApiResult<EmailCheck> {
    let conn = &mut db.conn().await?;

    let allowed = is_allowed(conn, &email).await?;

    Ok(ok(EmailCheck {
        email: normalize(&email),
        allowed,
    }))
}

async fn add_allowed(
    AdminOnly(claims): AdminOnly,
    Extension(db): Extension<Database>,
    Payload(req): Payload<AllowedEmailRequest>,
) -> Created<AllowedEmail> {
    #[derive(Insertable)]
    #[diesel(table_name = allowed_emails)]
    struct NewAllowedEmail {
        email: String,
        added_by: String,
        note: Option<String>,
    }

    req.check()?;

    let new_email = NewAllowedEmail {
        email: normalize(req.email.as_deref().unwrap_or_default()),
        added_by: claims.email,
        note: req.note.filter(|n| !n.trim().is_empty()),
    };

    let conn = &mut db.conn().await?;

    let allowed = diesel::insert_into(allowed_emails::table)
        .values(new_email)
        .get_result::<AllowedEmail>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    tracing::info!(email = %allowed.email, added_by = %allowed.added_by, "email allowed");
    Ok(created(allowed, "Email added to allowed list"))
}

async fn remove_allowed(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(allowed_emails::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Allowed email"));
    }

    Ok(message("Email removed from allowed list"))
}

pub fn app() -> Router {
    Router::new()
        .route("/allowed-emails", get(list_allowed).post(add_allowed))
        .route("/allowed-emails/check/:email", get(check_email))
        .route("/allowed-emails/:id", delete(remove_allowed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_normalized() {
        assert_eq!(normalize("  Ada@Comet.DEV "), "ada@comet.dev");
    }

    #[test]
    fn request_needs_a_valid_address() {
        let req = AllowedEmailRequest {
            email: Some("ada@comet.dev".to_string()),
            note: Some("club lead".to_string()),
        };
        assert!(req.check().is_ok());

        let req = AllowedEmailRequest {
            email: Some("ada".to_string()),
            note: None,
        };
        assert!(req.check().is_err());

        let req = AllowedEmailRequest {
            email: None,
            note: None,
        };
        let Err(AppError::Validation(errors)) = req.check() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "email is required");
    }
}
