use crate::{
    api::{
        created,
        extract::{Id, Params, Payload},
        list, message, ok, ApiResult, Created, Page,
    },
    db::Database,
    error::{AppError, AppResult},
    models::{Choice, ClubMember, Rank, User, UserAchievement},
    schema::*,
    validation::{has_text, not_blank, validate_username, validate_with},
};
use axum::{
    extract::Path,
    routing::get,
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use validator::Validate;

const LEADERBOARD_SIZE: i64 = 10;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[serde(flatten)]
    user: User,
    clubs: Vec<i32>,
    achievements: Vec<i32>,
}

async fn load_users(
    conn: &mut AsyncPgConnection,
    users: Vec<User>,
) -> AppResult<Vec<UserResponse>> {
    let ids = users.iter().map(|u| u.id).collect::<Vec<_>>();

    let memberships = club_members::table
        .filter(club_members::user_id.eq_any(ids.clone()))
        .load::<ClubMember>(conn)
        .await?
        .grouped_by(&users);
    let unlocks = user_achievements::table
        .filter(user_achievements::user_id.eq_any(ids))
        .load::<UserAchievement>(conn)
        .await?
        .grouped_by(&users);

    Ok(users
        .into_iter()
        .zip(memberships)
        .zip(unlocks)
        .map(|((user, memberships), unlocks)| UserResponse {
            user,
            clubs: memberships.into_iter().map(|m| m.club_id).collect(),
            achievements: unlocks.into_iter().map(|u| u.achievement_id).collect(),
        })
        .collect())
}

async fn load_user(conn: &mut AsyncPgConnection, user: User) -> AppResult<UserResponse> {
    Ok(load_users(conn, vec![user])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_users` should return one user"))?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    rank: Option<String>,
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<i64>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UserRequest {
    #[validate(custom(function = "validate_username"))]
    username: Option<String>,
    #[validate(custom(function = "not_blank"), email)]
    email: Option<String>,
    #[validate(length(max = 60))]
    display_name: Option<String>,
    avatar: Option<String>,
    #[validate(length(max = 500))]
    bio: Option<String>,
    #[validate(custom(function = "Rank::check"))]
    rank: Option<String>,
    #[validate(range(min = 0))]
    points: Option<i32>,
    #[validate(range(min = 0))]
    contributions: Option<i32>,
    #[validate(range(min = 0))]
    projects: Option<i32>,
    github: Option<String>,
    linkedin: Option<String>,
    twitter: Option<String>,
    portfolio: Option<String>,
}

impl UserRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("username", has_text(&self.username)),
            ("email", has_text(&self.email)),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

async fn list_users(
    Extension(db): Extension<Database>,
    Params(query): Params<UserListQuery>,
) -> ApiResult<Vec<UserResponse>> {
    let page = Page::new(query.page, query.limit);
    let conn = &mut db.conn().await?;

    let mut users_query = users::table.into_boxed();
    if let Some(rank) = query.rank {
        users_query = users_query.filter(users::rank.eq(rank));
    }
    let users = users_query
        .order(users::joined_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .load::<User>(conn)
        .await?;

    Ok(list(load_users(conn, users).await?))
}

async fn leaderboard(
    Extension(db): Extension<Database>,
    Params(query): Params<LeaderboardQuery>,
) -> ApiResult<Vec<User>> {
    let conn = &mut db.conn().await?;

    let users = users::table
        .order((users::points.desc(), users::username.asc()))
        .limit(query.limit.unwrap_or(LEADERBOARD_SIZE).clamp(1, 100))
        .load::<User>(conn)
        .await?;

    Ok(list(users))
}

async fn get_user(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<UserResponse> {
    let conn = &mut db.conn().await?;

    let user = users::table
        .find(id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(ok(load_user(conn, user).await?))
}

async fn get_user_by_username(
    Path(username): Path<String>,
    Extension(db): Extension<Database>,
) -> ApiResult<UserResponse> {
    let conn = &mut db.conn().await?;

    let user = users::table
        .filter(users::username.eq(username))
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(ok(load_user(conn, user).await?))
}

async fn create_user(
    Extension(db): Extension<Database>,
    Payload(req): Payload<UserRequest>,
) -> Created<UserResponse> {
    #[derive(Insertable)]
    #[diesel(table_name = users)]
    struct NewUser {
        username: String,
        email: String,
        display_name: Option<String>,
        avatar: Option<String>,
        bio: Option<String>,
        rank: String,
        points: i32,
        contributions: i32,
        projects: i32,
        github: Option<String>,
        linkedin: Option<String>,
        twitter: Option<String>,
        portfolio: Option<String>,
    }

    req.check(true)?;

    let rank = req
        .rank
        .as_deref()
        .and_then(Rank::parse)
        .unwrap_or(Rank::Cadet);
    let new_user = NewUser {
        username: req.username.unwrap_or_default().trim().to_string(),
        email: req.email.unwrap_or_default().trim().to_lowercase(),
        display_name: req.display_name,
        avatar: req.avatar,
        bio: req.bio,
        rank: rank.as_str().to_string(),
        points: req.points.unwrap_or(0),
        contributions: req.contributions.unwrap_or(0),
        projects: req.projects.unwrap_or(0),
        github: req.github,
        linkedin: req.linkedin,
        twitter: req.twitter,
        portfolio: req.portfolio,
    };

    let conn = &mut db.conn().await?;

    let user = diesel::insert_into(users::table)
        .values(new_user)
        .get_result::<User>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    Ok(created(
        UserResponse {
            user,
            clubs: vec![],
            achievements: vec![],
        },
        "User created successfully",
    ))
}

async fn update_user(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<UserRequest>,
) -> ApiResult<UserResponse> {
    #[derive(AsChangeset)]
    #[diesel(table_name = users)]
    struct UserChanges {
        username: Option<String>,
        email: Option<String>,
        display_name: Option<String>,
        avatar: Option<String>,
        bio: Option<String>,
        rank: Option<String>,
        points: Option<i32>,
        contributions: Option<i32>,
        projects: Option<i32>,
        github: Option<String>,
        linkedin: Option<String>,
        twitter: Option<String>,
        portfolio: Option<String>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let changes = UserChanges {
        username: req.username.map(|u| u.trim().to_string()),
        email: req.email.map(|e| e.trim().to_lowercase()),
        display_name: req.display_name,
        avatar: req.avatar,
        bio: req.bio,
        rank: req.rank,
        points: req.points,
        contributions: req.contributions,
        projects: req.projects,
        github: req.github,
        linkedin: req.linkedin,
        twitter: req.twitter,
        portfolio: req.portfolio,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let user = diesel::update(users::table.find(id))
        .set(changes)
        .get_result::<User>(conn)
        .await
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::not_found("User"))?;

    Ok(ok(load_user(conn, user).await?))
}

async fn delete_user(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(users::table.find(id)).execute(conn).await?;
    if deleted == 0 {
        return Err(AppError::not_found("User"));
    }

    Ok(message("User deleted successfully"))
}

pub fn app() -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/leaderboard", get(leaderboard))
        .route("/users/username/:username", get(get_user_by_username))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: Option<&str>, email: Option<&str>) -> UserRequest {
        UserRequest {
            username: username.map(str::to_string),
            email: email.map(str::to_string),
            display_name: None,
            avatar: None,
            bio: None,
            rank: None,
            points: None,
            contributions: None,
            projects: None,
            github: None,
            linkedin: None,
            twitter: None,
            portfolio: None,
        }
    }

    fn invalid_fields(result: AppResult<()>) -> Vec<String> {
        let Err(AppError::Validation(errors)) = result else {
            panic!("expected validation errors");
        };
        errors.into_iter().map(|e| e.field.into_owned()).collect()
    }

    #[test]
    fn creation_requires_identity_fields() {
        assert!(request(Some("ada_l"), Some("ada@comet.dev"))
            .check(true)
            .is_ok());
        assert_eq!(
            invalid_fields(request(None, Some("ada@comet.dev")).check(true)),
            vec!["username"]
        );
        assert_eq!(
            invalid_fields(request(Some("ab"), None).check(true)),
            vec!["email", "username"]
        );
        assert_eq!(
            invalid_fields(request(Some("ada_l"), Some("not-an-email")).check(true)),
            vec!["email"]
        );
    }

    #[test]
    fn updates_may_omit_identity_fields() {
        assert!(request(None, None).check(false).is_ok());
        assert!(request(Some(""), None).check(false).is_err());
        assert!(request(None, Some("  ")).check(false).is_err());
    }

    #[test]
    fn counters_cannot_go_negative() {
        let mut req = request(None, None);
        req.points = Some(-5);

        let Err(AppError::Validation(errors)) = req.check(false) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors[0].message, "points must be at least 0");
    }
}
