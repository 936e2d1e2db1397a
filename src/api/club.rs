use crate::{
    api::{
        created,
        extract::{Id, Params, Payload},
        list, message, ok, ok_with_message, ApiResult, Created, Page,
    },
    db::Database,
    error::{AppError, AppResult},
    models::{Choice, Club, ClubCategory, ClubMember, MemberRole, User},
    schema::*,
    validation::{has_text, not_blank, validate_with},
};
use axum::{
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubResponse {
    #[serde(flatten)]
    club: Club,
    members: Vec<ClubMember>,
    member_count: usize,
}

impl ClubResponse {
    fn new(club: Club, members: Vec<ClubMember>) -> Self {
        Self {
            club,
            member_count: members.len(),
            members,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberResponse {
    user: User,
    role: String,
    joined_at: DateTime<Utc>,
}

async fn load_clubs(
    conn: &mut AsyncPgConnection,
    clubs: Vec<Club>,
) -> AppResult<Vec<ClubResponse>> {
    let members = club_members::table
        .filter(club_members::club_id.eq_any(clubs.iter().map(|c| c.id)))
        .order(club_members::joined_at.asc())
        .load::<ClubMember>(conn)
        .await?
        .grouped_by(&clubs);

    Ok(clubs
        .into_iter()
        .zip(members)
        .map(|(club, members)| ClubResponse::new(club, members))
        .collect())
}

async fn load_club(conn: &mut AsyncPgConnection, id: i32) -> AppResult<ClubResponse> {
    let club = find_club(conn, id).await?;

    Ok(load_clubs(conn, vec![club])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_clubs` should return one club"))?)
}

async fn find_club(conn: &mut AsyncPgConnection, id: i32) -> AppResult<Club> {
    clubs::table
        .find(id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Club"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClubListQuery {
    category: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ClubRequest {
    #[validate(custom(function = "not_blank"), length(max = 50))]
    name: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 500))]
    description: Option<String>,
    #[validate(custom(function = "not_blank"))]
    icon: Option<String>,
    #[validate(custom(function = "not_blank"))]
    color: Option<String>,
    #[validate(custom(function = "not_blank"))]
    gradient: Option<String>,
    #[validate(custom(function = "ClubCategory::check"))]
    category: Option<String>,
    created_by: Option<i32>,
}

impl ClubRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("name", has_text(&self.name)),
            ("description", has_text(&self.description)),
            ("icon", has_text(&self.icon)),
            ("color", has_text(&self.color)),
            ("gradient", has_text(&self.gradient)),
            ("createdBy", self.created_by.is_some()),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct MembershipRequest {
    user_id: Option<i32>,
    #[validate(custom(function = "MemberRole::check"))]
    role: Option<String>,
}

impl MembershipRequest {
    /// Joining also checks the requested role; leaving ignores it.
    fn user_id(&self, with_role: bool) -> AppResult<i32> {
        if with_role {
            validate_with(self, &[("userId", self.user_id.is_some())])?;
        }

        self.user_id
            .ok_or_else(|| AppError::field("userId", "userId is required"))
    }
}

async fn list_clubs(
    Extension(db): Extension<Database>,
    Params(query): Params<ClubListQuery>,
) -> ApiResult<Vec<ClubResponse>> {
    let page = Page::new(query.page, query.limit);
    let conn = &mut db.conn().await?;

    let mut clubs_query = clubs::table.into_boxed();
    if let Some(category) = query.category {
        clubs_query = clubs_query.filter(clubs::category.eq(category));
    }
    let clubs = clubs_query
        .order(clubs::name.asc())
        .limit(page.limit())
        .offset(page.offset())
        .load::<Club>(conn)
        .await?;

    Ok(list(load_clubs(conn, clubs).await?))
}

async fn get_club(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<ClubResponse> {
    let conn = &mut db.conn().await?;

    Ok(ok(load_club(conn, id).await?))
}

async fn list_members(
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<Vec<MemberResponse>> {
    let conn = &mut db.conn().await?;

    find_club(conn, id).await?;
    let members = club_members::table
        .inner_join(users::table)
        .filter(club_members::club_id.eq(id))
        .order(club_members::joined_at.asc())
        .load::<(ClubMember, User)>(conn)
        .await?
        .into_iter()
        .map(|(member, user)| MemberResponse {
            user,
            role: member.role,
            joined_at: member.joined_at,
        })
        .collect();

    Ok(list(members))
}

async fn create_club(
    Extension(db): Extension<Database>,
    Payload(req): Payload<ClubRequest>,
) -> Created<ClubResponse> {
    #[derive(Insertable)]
    #[diesel(table_name = clubs)]
    struct NewClub {
        name: String,
        description: String,
        icon: String,
        color: String,
        gradient: String,
        category: String,
        created_by: i32,
    }

    req.check(true)?;

    let category = req
        .category
        .as_deref()
        .and_then(ClubCategory::parse)
        .unwrap_or(ClubCategory::Technical);
    let new_club = NewClub {
        name: req.name.unwrap_or_default().trim().to_string(),
        description: req.description.unwrap_or_default().trim().to_string(),
        icon: req.icon.unwrap_or_default(),
        color: req.color.unwrap_or_default(),
        gradient: req.gradient.unwrap_or_default(),
        category: category.as_str().to_string(),
        created_by: req.created_by.unwrap_or_default(),
    };

    let conn = &mut db.conn().await?;

    let club = diesel::insert_into(clubs::table)
        .values(new_club)
        .get_result::<Club>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    tracing::info!(club_id = club.id, name = %club.name, "club created");
    Ok(created(
        ClubResponse::new(club, vec![]),
        "Club created successfully",
    ))
}

async fn update_club(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<ClubRequest>,
) -> ApiResult<ClubResponse> {
    #[derive(AsChangeset)]
    #[diesel(table_name = clubs)]
    struct ClubChanges {
        name: Option<String>,
        description: Option<String>,
        icon: Option<String>,
        color: Option<String>,
        gradient: Option<String>,
        category: Option<String>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let changes = ClubChanges {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description.map(|d| d.trim().to_string()),
        icon: req.icon,
        color: req.color,
        gradient: req.gradient,
        category: req.category,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let updated = diesel::update(clubs::table.find(id))
        .set(changes)
        .execute(conn)
        .await
        .map_err(AppError::from_diesel)?;
    if updated == 0 {
        return Err(AppError::not_found("Club"));
    }

    Ok(ok(load_club(conn, id).await?))
}

async fn delete_club(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(clubs::table.find(id)).execute(conn).await?;
    if deleted == 0 {
        return Err(AppError::not_found("Club"));
    }

    Ok(message("Club deleted successfully"))
}

async fn join_club(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<MembershipRequest>,
) -> ApiResult<ClubResponse> {
    let user_id = req.user_id(true)?;
    let role = req
        .role
        .as_deref()
        .and_then(MemberRole::parse)
        .unwrap_or(MemberRole::Member);

    let conn = &mut db.conn().await?;

    find_club(conn, id).await?;
    let inserted = diesel::insert_into(club_members::table)
        .values((
            club_members::club_id.eq(id),
            club_members::user_id.eq(user_id),
            club_members::role.eq(role.as_str()),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await
        .map_err(AppError::from_diesel)?;
    if inserted == 0 {
        return Err(AppError::bad_request("User is already a member of this club"));
    }

    Ok(ok_with_message(
        load_club(conn, id).await?,
        "Joined club successfully",
    ))
}

async fn leave_club(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<MembershipRequest>,
) -> ApiResult<ClubResponse> {
    let user_id = req.user_id(false)?;

    let conn = &mut db.conn().await?;

    find_club(conn, id).await?;
    let deleted = diesel::delete(
        club_members::table
            .filter(club_members::club_id.eq(id))
            .filter(club_members::user_id.eq(user_id)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(AppError::bad_request("User is not a member of this club"));
    }

    Ok(ok_with_message(
        load_club(conn, id).await?,
        "Left club successfully",
    ))
}

pub fn app() -> Router {
    Router::new()
        .route("/clubs", get(list_clubs).post(create_club))
        .route(
            "/clubs/:id",
            get(get_club).put(update_club).delete(delete_club),
        )
        .route("/clubs/:id/members", get(list_members))
        .route("/clubs/:id/join", post(join_club))
        .route("/clubs/:id/leave", post(leave_club))
}
