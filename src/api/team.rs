use crate::{
    api::{
        created,
        extract::{Id, Params, Payload},
        list, message, ok, ok_with_message, ApiResult, Created,
    },
    auth::AdminOnly,
    db::Database,
    error::{AppError, AppResult},
    models::{Choice, TeamCategory, TeamMember, TeamStatus},
    schema::*,
    validation::{has_text, not_blank, validate_with},
};
use axum::{
    routing::{delete, get, patch, put},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::{
    dsl::{count_star, max},
    prelude::*,
    sql_types::{Array, Integer},
};
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use std::collections::HashSet;
use validator::Validate;

const REORDER: &str = "\
UPDATE team_members t \
SET display_order = v.display_order, updated_at = NOW() \
FROM UNNEST($1, $2) AS v(id, display_order) \
WHERE t.id = v.id";

async fn load_team(
    conn: &mut AsyncPgConnection,
    active_only: bool,
    category: Option<String>,
) -> AppResult<Vec<TeamMember>> {
    let mut team_query = team_members::table.into_boxed();
    if active_only {
        team_query = team_query.filter(team_members::is_active.eq(true));
    }
    if let Some(category) = category {
        team_query = team_query.filter(team_members::category.eq(category));
    }

    Ok(team_query
        .order((team_members::display_order.asc(), team_members::id.asc()))
        .load::<TeamMember>(conn)
        .await?)
}

/// Flips a member between listed and hidden without touching other fields.
async fn set_active(conn: &mut AsyncPgConnection, id: i32, active: bool) -> AppResult<TeamMember> {
    let status = if active {
        TeamStatus::Active
    } else {
        TeamStatus::Inactive
    };

    diesel::update(team_members::table.find(id))
        .set((
            team_members::is_active.eq(active),
            team_members::status.eq(status.as_str()),
            team_members::updated_at.eq(Utc::now()),
        ))
        .get_result::<TeamMember>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Team member"))
}

#[derive(Deserialize)]
struct TeamListQuery {
    category: Option<String>,
}

/// Inactive members are hidden from the public list; alumni stay listed.
fn is_listed(status: TeamStatus) -> bool {
    status != TeamStatus::Inactive
}

#[derive(Deserialize, Validate)]
struct TeamMemberRequest {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    name: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 100))]
    role: Option<String>,
    #[validate(custom(function = "TeamCategory::check"))]
    category: Option<String>,
    year: Option<String>,
    branch: Option<String>,
    image: Option<String>,
    #[validate(length(max = 500))]
    bio: Option<String>,
    github: Option<String>,
    linkedin: Option<String>,
    twitter: Option<String>,
    #[validate(email)]
    email: Option<String>,
    #[validate(custom(function = "TeamStatus::check"))]
    status: Option<String>,
    #[validate(range(min = 0))]
    order: Option<i32>,
}

impl TeamMemberRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("name", has_text(&self.name)),
            ("role", has_text(&self.role)),
            ("category", has_text(&self.category)),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

#[derive(Deserialize)]
struct ReorderItem {
    id: i32,
    order: i32,
}

fn validate_reorder(items: &[ReorderItem]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::bad_request("At least one team member is required"));
    }

    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id) {
            return Err(AppError::bad_request(format!(
                "Team member {} appears more than once",
                item.id
            )));
        }
        if item.order < 0 {
            return Err(AppError::field("order", "order must be at least 0"));
        }
    }
    Ok(())
}

async fn list_team(
    Extension(db): Extension<Database>,
    Params(query): Params<TeamListQuery>,
) -> ApiResult<Vec<TeamMember>> {
    let conn = &mut db.conn().await?;

    Ok(list(load_team(conn, true, query.category).await?))
}

async fn list_all_team(
    _: AdminOnly,
    Extension(db): Extension<Database>,
) -> ApiResult<Vec<TeamMember>> {
    let conn = &mut db.conn().await?;

    Ok(list(load_team(conn, false, None).await?))
}

async fn get_team_member(
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<TeamMember> {
    let conn = &mut db.conn().await?;

    let member = team_members::table
        .find(id)
        .first::<TeamMember>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Team member"))?;

    Ok(ok(member))
}

async fn create_team_member(
    _: AdminOnly,
    Extension(db): Extension<Database>,
    Payload(req): Payload<TeamMemberRequest>,
) -> Created<TeamMember> {
    #[derive(Insertable)]
    #[diesel(table_name = team_members)]
    struct NewTeamMember {
        name: String,
        role: String,
        category: String,
        year: Option<String>,
        branch: Option<String>,
        image: Option<String>,
        bio: Option<String>,
        github: Option<String>,
        linkedin: Option<String>,
        twitter: Option<String>,
        email: Option<String>,
        status: String,
        display_order: i32,
        is_active: bool,
    }

    req.check(true)?;

    let status = req
        .status
        .as_deref()
        .and_then(TeamStatus::parse)
        .unwrap_or(TeamStatus::Active);

    let conn = &mut db.conn().await?;

    // new members go to the end unless an explicit position is given
    let display_order = match req.order {
        Some(order) => order,
        None => team_members::table
            .select(max(team_members::display_order))
            .get_result::<Option<i32>>(conn)
            .await?
            .map_or(0, |last| last + 1),
    };

    let member = diesel::insert_into(team_members::table)
        .values(NewTeamMember {
            name: req.name.unwrap_or_default().trim().to_string(),
            role: req.role.unwrap_or_default().trim().to_string(),
            category: req.category.unwrap_or_default(),
            year: req.year,
            branch: req.branch,
            image: req.image,
            bio: req.bio,
            github: req.github,
            linkedin: req.linkedin,
            twitter: req.twitter,
            email: req.email.map(|e| e.trim().to_lowercase()),
            status: status.as_str().to_string(),
            display_order,
            is_active: is_listed(status),
        })
        .get_result::<TeamMember>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    Ok(created(member, "Team member created successfully"))
}

async fn update_team_member(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<TeamMemberRequest>,
) -> ApiResult<TeamMember> {
    #[derive(AsChangeset)]
    #[diesel(table_name = team_members)]
    struct TeamMemberChanges {
        name: Option<String>,
        role: Option<String>,
        category: Option<String>,
        year: Option<String>,
        branch: Option<String>,
        image: Option<String>,
        bio: Option<String>,
        github: Option<String>,
        linkedin: Option<String>,
        twitter: Option<String>,
        email: Option<String>,
        status: Option<String>,
        is_active: Option<bool>,
        display_order: Option<i32>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let status = req.status.as_deref().and_then(TeamStatus::parse);
    let changes = TeamMemberChanges {
        name: req.name.map(|n| n.trim().to_string()),
        role: req.role.map(|r| r.trim().to_string()),
        category: req.category,
        year: req.year,
        branch: req.branch,
        image: req.image,
        bio: req.bio,
        github: req.github,
        linkedin: req.linkedin,
        twitter: req.twitter,
        email: req.email.map(|e| e.trim().to_lowercase()),
        status: status.map(|s| s.as_str().to_string()),
        is_active: status.map(is_listed),
        display_order: req.order,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let member = diesel::update(team_members::table.find(id))
        .set(changes)
        .get_result::<TeamMember>(conn)
        .await
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::not_found("Team member"))?;

    Ok(ok(member))
}

async fn reorder_team(
    _: AdminOnly,
    Extension(db): Extension<Database>,
    Payload(items): Payload<Vec<ReorderItem>>,
) -> ApiResult<Vec<TeamMember>> {
    validate_reorder(&items)?;
    let (ids, orders): (Vec<i32>, Vec<i32>) =
        items.iter().map(|item| (item.id, item.order)).unzip();

    let conn = &mut db.conn().await?;

    let known = team_members::table
        .filter(team_members::id.eq_any(ids.clone()))
        .select(count_star())
        .get_result::<i64>(conn)
        .await?;
    if known != ids.len() as i64 {
        return Err(AppError::not_found("Team member"));
    }

    diesel::sql_query(REORDER)
        .bind::<Array<Integer>, _>(ids)
        .bind::<Array<Integer>, _>(orders)
        .execute(conn)
        .await?;

    Ok(ok_with_message(
        load_team(conn, false, None).await?,
        "Team members reordered successfully",
    ))
}

async fn deactivate_team_member(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<TeamMember> {
    let conn = &mut db.conn().await?;

    let member = set_active(conn, id, false).await?;
    tracing::info!(team_member_id = id, "team member deactivated");

    Ok(ok_with_message(member, "Team member deactivated successfully"))
}

async fn restore_team_member(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<TeamMember> {
    let conn = &mut db.conn().await?;

    let member = set_active(conn, id, true).await?;

    Ok(ok_with_message(member, "Team member restored successfully"))
}

async fn delete_team_member(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(team_members::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Team member"));
    }
    tracing::info!(team_member_id = id, "team member permanently deleted");

    Ok(message("Team member permanently deleted"))
}

pub fn app() -> Router {
    Router::new()
        .route("/team", get(list_team).post(create_team_member))
        .route("/team/all", get(list_all_team))
        .route("/team/reorder", put(reorder_team))
        .route(
            "/team/:id",
            get(get_team_member)
                .put(update_team_member)
                .delete(deactivate_team_member),
        )
        .route("/team/:id/restore", patch(restore_team_member))
        .route("/team/:id/permanent", delete(delete_team_member))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i32, order: i32) -> ReorderItem {
        ReorderItem { id, order }
    }

    #[test]
    fn reorder_needs_distinct_ids() {
        assert!(validate_reorder(&[item(1, 0), item(2, 1)]).is_ok());
        assert!(validate_reorder(&[]).is_err());
        assert!(validate_reorder(&[item(1, 0), item(1, 1)]).is_err());
        assert!(validate_reorder(&[item(1, -1)]).is_err());
    }

    #[test]
    fn member_needs_known_category() {
        let req = TeamMemberRequest {
            name: Some("Grace".to_string()),
            role: Some("Faculty Advisor".to_string()),
            category: Some("advisor".to_string()),
            year: None,
            branch: None,
            image: None,
            bio: None,
            github: None,
            linkedin: None,
            twitter: None,
            email: Some("grace@comet.dev".to_string()),
            status: None,
            order: None,
        };

        let Err(AppError::Validation(errors)) = req.check(true) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "category");
    }

    #[test]
    fn only_inactive_members_are_hidden() {
        assert!(is_listed(TeamStatus::Active));
        assert!(is_listed(TeamStatus::Alumni));
        assert!(!is_listed(TeamStatus::Inactive));
    }
}
