use crate::{
    api::{
        created,
        extract::{Id, Params, Payload},
        list, message, ok, ApiResult, Created,
    },
    auth::AdminOnly,
    db::Database,
    error::{AppError, AppResult},
    models::{Achievement, AchievementCategory, Choice, Rarity, UserAchievement},
    schema::*,
    validation::{has_text, not_blank, validate_with},
};
use axum::{
    extract::Path,
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::{prelude::*, sql_types::Integer};
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

const FULL_PROGRESS: i32 = 100;

/// Records the unlock and credits the user's points in one statement. Nothing
/// is credited when the pair was already unlocked.
const UNLOCK_AND_AWARD: &str = "\
WITH unlocked AS ( \
    INSERT INTO user_achievements (user_id, achievement_id, progress) \
    VALUES ($1, $2, $3) \
    ON CONFLICT (user_id, achievement_id) DO NOTHING \
    RETURNING * \
), awarded AS ( \
    UPDATE users SET points = points + $4 \
    WHERE id = $1 AND EXISTS (SELECT 1 FROM unlocked) \
) \
SELECT * FROM unlocked";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnlockedAchievement {
    #[serde(flatten)]
    achievement: Achievement,
    progress: i32,
    unlocked_at: DateTime<Utc>,
}

async fn find_achievement(conn: &mut AsyncPgConnection, id: i32) -> AppResult<Achievement> {
    achievements::table
        .find(id)
        .first::<Achievement>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Achievement"))
}

#[derive(Deserialize)]
struct AchievementListQuery {
    category: Option<String>,
    rarity: Option<String>,
}

fn is_object(criteria: &serde_json::Value) -> Result<(), ValidationError> {
    if criteria.is_object() {
        return Ok(());
    }
    let mut err = ValidationError::new("object");
    err.message = Some("must be an object".into());
    Err(err)
}

#[derive(Deserialize, Validate)]
struct AchievementRequest {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    title: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 500))]
    description: Option<String>,
    #[validate(custom(function = "not_blank"))]
    icon: Option<String>,
    #[validate(custom(function = "AchievementCategory::check"))]
    category: Option<String>,
    #[validate(custom(function = "Rarity::check"))]
    rarity: Option<String>,
    #[validate(range(min = 0))]
    points: Option<i32>,
    #[validate(custom(function = "is_object"))]
    criteria: Option<serde_json::Value>,
}

impl AchievementRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("title", has_text(&self.title)),
            ("description", has_text(&self.description)),
            ("icon", has_text(&self.icon)),
            ("category", has_text(&self.category)),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UnlockRequest {
    user_id: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    progress: Option<i32>,
}

impl UnlockRequest {
    /// The unlocking user and the recorded progress.
    fn check(&self) -> AppResult<(i32, i32)> {
        validate_with(self, &[("userId", self.user_id.is_some())])?;

        let user_id = self
            .user_id
            .ok_or_else(|| AppError::field("userId", "userId is required"))?;
        Ok((user_id, self.progress.unwrap_or(FULL_PROGRESS)))
    }
}

async fn list_achievements(
    Extension(db): Extension<Database>,
    Params(query): Params<AchievementListQuery>,
) -> ApiResult<Vec<Achievement>> {
    let conn = &mut db.conn().await?;

    let mut achievements_query = achievements::table.into_boxed();
    if let Some(category) = query.category {
        achievements_query = achievements_query.filter(achievements::category.eq(category));
    }
    if let Some(rarity) = query.rarity {
        achievements_query = achievements_query.filter(achievements::rarity.eq(rarity));
    }
    let achievements = achievements_query
        .order((achievements::points.asc(), achievements::title.asc()))
        .load::<Achievement>(conn)
        .await?;

    Ok(list(achievements))
}

async fn get_achievement(
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<Achievement> {
    let conn = &mut db.conn().await?;

    Ok(ok(find_achievement(conn, id).await?))
}

async fn list_user_achievements(
    Path(user_id): Path<String>,
    Extension(db): Extension<Database>,
) -> ApiResult<Vec<UnlockedAchievement>> {
    let user_id = user_id
        .parse::<i32>()
        .map_err(|_| AppError::bad_request(format!("invalid id `{user_id}`")))?;

    let conn = &mut db.conn().await?;

    let unlocked = user_achievements::table
        .inner_join(achievements::table)
        .filter(user_achievements::user_id.eq(user_id))
        .order(user_achievements::unlocked_at.desc())
        .load::<(UserAchievement, Achievement)>(conn)
        .await?
        .into_iter()
        .map(|(unlock, achievement)| UnlockedAchievement {
            achievement,
            progress: unlock.progress,
            unlocked_at: unlock.unlocked_at,
        })
        .collect();

    Ok(list(unlocked))
}

async fn create_achievement(
    _: AdminOnly,
    Extension(db): Extension<Database>,
    Payload(req): Payload<AchievementRequest>,
) -> Created<Achievement> {
    #[derive(Insertable)]
    #[diesel(table_name = achievements)]
    struct NewAchievement {
        title: String,
        description: String,
        icon: String,
        category: String,
        rarity: String,
        points: i32,
        criteria: serde_json::Value,
    }

    req.check(true)?;

    let rarity = req
        .rarity
        .as_deref()
        .and_then(Rarity::parse)
        .unwrap_or(Rarity::Common);
    let new_achievement = NewAchievement {
        title: req.title.unwrap_or_default().trim().to_string(),
        description: req.description.unwrap_or_default().trim().to_string(),
        icon: req.icon.unwrap_or_default(),
        category: req.category.unwrap_or_default(),
        rarity: rarity.as_str().to_string(),
        points: req.points.unwrap_or(0),
        criteria: req
            .criteria
            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
    };

    let conn = &mut db.conn().await?;

    let achievement = diesel::insert_into(achievements::table)
        .values(new_achievement)
        .get_result::<Achievement>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    Ok(created(achievement, "Achievement created successfully"))
}

async fn update_achievement(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<AchievementRequest>,
) -> ApiResult<Achievement> {
    #[derive(AsChangeset)]
    #[diesel(table_name = achievements)]
    struct AchievementChanges {
        title: Option<String>,
        description: Option<String>,
        icon: Option<String>,
        category: Option<String>,
        rarity: Option<String>,
        points: Option<i32>,
        criteria: Option<serde_json::Value>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let changes = AchievementChanges {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description.map(|d| d.trim().to_string()),
        icon: req.icon,
        category: req.category,
        rarity: req.rarity,
        points: req.points,
        criteria: req.criteria,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let achievement = diesel::update(achievements::table.find(id))
        .set(changes)
        .get_result::<Achievement>(conn)
        .await
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::not_found("Achievement"))?;

    Ok(ok(achievement))
}

async fn delete_achievement(
    _: AdminOnly,
    Id(id): Id,
    Extension(db): Extension<Database>,
) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(achievements::table.find(id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("Achievement"));
    }

    Ok(message("Achievement deleted successfully"))
}

async fn unlock(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<UnlockRequest>,
) -> Created<UserAchievement> {
    let (user_id, progress) = req.check()?;

    let conn = &mut db.conn().await?;

    let achievement = find_achievement(conn, id).await?;
    let unlocked = diesel::sql_query(UNLOCK_AND_AWARD)
        .bind::<Integer, _>(user_id)
        .bind::<Integer, _>(id)
        .bind::<Integer, _>(progress)
        .bind::<Integer, _>(achievement.points)
        .get_result::<UserAchievement>(conn)
        .await
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::bad_request("Achievement already unlocked"))?;

    tracing::info!(
        user_id,
        achievement_id = id,
        points = achievement.points,
        "achievement unlocked"
    );
    Ok(created(unlocked, "Achievement unlocked successfully"))
}

pub fn app() -> Router {
    Router::new()
        .route(
            "/achievements",
            get(list_achievements).post(create_achievement),
        )
        .route("/achievements/user/:user_id", get(list_user_achievements))
        .route(
            "/achievements/:id",
            get(get_achievement)
                .put(update_achievement)
                .delete(delete_achievement),
        )
        .route("/achievements/:id/unlock", post(unlock))
}
