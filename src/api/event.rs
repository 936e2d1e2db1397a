use crate::{
    api::{
        created,
        extract::{Id, Params, Payload},
        list, message, ok, ok_with_message, ApiResult, Created, Page,
    },
    db::Database,
    error::{AppError, AppResult},
    models::{Choice, Event, EventMode, EventParticipant, EventStatus},
    schema::*,
    validation::{has_text, not_blank, validate_with},
};
use axum::{
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use diesel::{prelude::*, sql_types::Integer};
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// Appends a participant only while the event still has room. The check and
/// the insert run as one statement so concurrent registrations cannot
/// overfill an event.
const REGISTER_IF_ROOM: &str = "\
INSERT INTO event_participants (event_id, user_id) \
SELECT e.id, $2 FROM events e \
WHERE e.id = $1 AND (e.max_participants IS NULL OR \
(SELECT COUNT(*) FROM event_participants p WHERE p.event_id = e.id) < e.max_participants) \
ON CONFLICT (event_id, user_id) DO NOTHING";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    #[serde(flatten)]
    event: Event,
    participants: Vec<i32>,
    participant_count: usize,
    is_full: bool,
    spots_left: Option<i64>,
}

impl EventResponse {
    fn new(event: Event, participants: Vec<i32>) -> Self {
        let count = participants.len();
        Self {
            is_full: event.is_full(count),
            spots_left: event.spots_left(count),
            participant_count: count,
            participants,
            event,
        }
    }
}

async fn load_events(
    conn: &mut AsyncPgConnection,
    events: Vec<Event>,
) -> AppResult<Vec<EventResponse>> {
    let participants = event_participants::table
        .filter(event_participants::event_id.eq_any(events.iter().map(|e| e.id)))
        .order(event_participants::registered_at.asc())
        .load::<EventParticipant>(conn)
        .await?
        .grouped_by(&events);

    Ok(events
        .into_iter()
        .zip(participants)
        .map(|(event, participants)| {
            EventResponse::new(event, participants.into_iter().map(|p| p.user_id).collect())
        })
        .collect())
}

async fn load_event(conn: &mut AsyncPgConnection, id: i32) -> AppResult<EventResponse> {
    let event = find_event(conn, id).await?;

    Ok(load_events(conn, vec![event])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_events` should return one event"))?)
}

async fn find_event(conn: &mut AsyncPgConnection, id: i32) -> AppResult<Event> {
    events::table
        .find(id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("Event"))
}

async fn is_registered(conn: &mut AsyncPgConnection, id: i32, user_id: i32) -> AppResult<bool> {
    Ok(diesel::select(diesel::dsl::exists(
        event_participants::table
            .filter(event_participants::event_id.eq(id))
            .filter(event_participants::user_id.eq(user_id)),
    ))
    .get_result::<bool>(conn)
    .await?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListQuery {
    status: Option<String>,
    club_id: Option<i32>,
    upcoming: Option<bool>,
    page: Option<i64>,
    limit: Option<i64>,
}

/// Keeps an explicit `null` apart from an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct EventRequest {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    title: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 2000))]
    description: Option<String>,
    club_id: Option<i32>,
    date: Option<DateTime<Utc>>,
    #[validate(custom(function = "not_blank"))]
    time: Option<String>,
    #[validate(range(min = 1))]
    duration: Option<i32>,
    #[validate(custom(function = "not_blank"))]
    location: Option<String>,
    #[validate(custom(function = "EventMode::check"))]
    mode: Option<String>,
    #[validate(custom(function = "EventStatus::check"))]
    status: Option<String>,
    /// `null` removes the cap on update.
    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 1))]
    max_participants: Option<Option<i32>>,
    images: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    created_by: Option<i32>,
}

impl EventRequest {
    fn check(&self, creating: bool) -> AppResult<()> {
        let required = [
            ("title", has_text(&self.title)),
            ("description", has_text(&self.description)),
            ("clubId", self.club_id.is_some()),
            ("date", self.date.is_some()),
            ("time", has_text(&self.time)),
            ("duration", self.duration.is_some()),
            ("location", has_text(&self.location)),
            ("createdBy", self.created_by.is_some()),
        ];
        validate_with(self, if creating { &required[..] } else { &[] })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest {
    user_id: Option<i32>,
}

impl RegistrationRequest {
    fn user_id(&self) -> AppResult<i32> {
        self.user_id
            .ok_or_else(|| AppError::field("userId", "userId is required"))
    }
}

async fn list_events(
    Extension(db): Extension<Database>,
    Params(query): Params<EventListQuery>,
) -> ApiResult<Vec<EventResponse>> {
    let page = Page::new(query.page, query.limit);
    let conn = &mut db.conn().await?;

    let mut events_query = events::table.into_boxed();
    if let Some(status) = query.status {
        events_query = events_query.filter(events::status.eq(status));
    }
    if let Some(club_id) = query.club_id {
        events_query = events_query.filter(events::club_id.eq(club_id));
    }
    if query.upcoming == Some(true) {
        events_query = events_query.filter(events::date.ge(Utc::now()));
    }
    let events = events_query
        .order(events::date.asc())
        .limit(page.limit())
        .offset(page.offset())
        .load::<Event>(conn)
        .await?;

    Ok(list(load_events(conn, events).await?))
}

async fn get_event(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<EventResponse> {
    let conn = &mut db.conn().await?;

    Ok(ok(load_event(conn, id).await?))
}

async fn create_event(
    Extension(db): Extension<Database>,
    Payload(req): Payload<EventRequest>,
) -> Created<EventResponse> {
    #[derive(Insertable)]
    #[diesel(table_name = events)]
    struct NewEvent {
        title: String,
        description: String,
        club_id: i32,
        date: DateTime<Utc>,
        time: String,
        duration: i32,
        location: String,
        mode: String,
        status: String,
        max_participants: Option<i32>,
        images: Vec<String>,
        tags: Vec<String>,
        created_by: i32,
    }

    req.check(true)?;

    let mode = req
        .mode
        .as_deref()
        .and_then(EventMode::parse)
        .unwrap_or(EventMode::Offline);
    let status = req
        .status
        .as_deref()
        .and_then(EventStatus::parse)
        .unwrap_or(EventStatus::Upcoming);
    let new_event = NewEvent {
        title: req.title.unwrap_or_default().trim().to_string(),
        description: req.description.unwrap_or_default().trim().to_string(),
        club_id: req.club_id.unwrap_or_default(),
        date: req.date.unwrap_or_else(Utc::now),
        time: req.time.unwrap_or_default(),
        duration: req.duration.unwrap_or_default(),
        location: req.location.unwrap_or_default(),
        mode: mode.as_str().to_string(),
        status: status.as_str().to_string(),
        max_participants: req.max_participants.flatten(),
        images: req.images.unwrap_or_default(),
        tags: req.tags.unwrap_or_default(),
        created_by: req.created_by.unwrap_or_default(),
    };

    let conn = &mut db.conn().await?;

    let event = diesel::insert_into(events::table)
        .values(new_event)
        .get_result::<Event>(conn)
        .await
        .map_err(AppError::from_diesel)?;

    tracing::info!(event_id = event.id, club_id = event.club_id, "event created");
    Ok(created(
        EventResponse::new(event, vec![]),
        "Event created successfully",
    ))
}

async fn update_event(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<EventRequest>,
) -> ApiResult<EventResponse> {
    #[derive(AsChangeset)]
    #[diesel(table_name = events)]
    struct EventChanges {
        title: Option<String>,
        description: Option<String>,
        club_id: Option<i32>,
        date: Option<DateTime<Utc>>,
        time: Option<String>,
        duration: Option<i32>,
        location: Option<String>,
        mode: Option<String>,
        status: Option<String>,
        max_participants: Option<Option<i32>>,
        images: Option<Vec<String>>,
        tags: Option<Vec<String>>,
        updated_at: DateTime<Utc>,
    }

    req.check(false)?;

    let changes = EventChanges {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description.map(|d| d.trim().to_string()),
        club_id: req.club_id,
        date: req.date,
        time: req.time,
        duration: req.duration,
        location: req.location,
        mode: req.mode,
        status: req.status,
        max_participants: req.max_participants,
        images: req.images,
        tags: req.tags,
        updated_at: Utc::now(),
    };

    let conn = &mut db.conn().await?;

    let updated = diesel::update(events::table.find(id))
        .set(changes)
        .execute(conn)
        .await
        .map_err(AppError::from_diesel)?;
    if updated == 0 {
        return Err(AppError::not_found("Event"));
    }

    Ok(ok(load_event(conn, id).await?))
}

async fn delete_event(Id(id): Id, Extension(db): Extension<Database>) -> ApiResult<()> {
    let conn = &mut db.conn().await?;

    let deleted = diesel::delete(events::table.find(id)).execute(conn).await?;
    if deleted == 0 {
        return Err(AppError::not_found("Event"));
    }

    Ok(message("Event deleted successfully"))
}

async fn register(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<RegistrationRequest>,
) -> ApiResult<EventResponse> {
    let user_id = req.user_id()?;

    let conn = &mut db.conn().await?;

    let event = find_event(conn, id).await?;
    if !event.accepts_registrations() {
        return Err(AppError::bad_request("Registration is closed"));
    }

    let inserted = diesel::sql_query(REGISTER_IF_ROOM)
        .bind::<Integer, _>(id)
        .bind::<Integer, _>(user_id)
        .execute(conn)
        .await
        .map_err(AppError::from_diesel)?;
    if inserted == 0 {
        return Err(if is_registered(conn, id, user_id).await? {
            AppError::bad_request("User is already registered for this event")
        } else {
            AppError::bad_request("Event is full")
        });
    }

    tracing::info!(event_id = id, user_id, "registered for event");
    Ok(ok_with_message(
        load_event(conn, id).await?,
        "Registered for event successfully",
    ))
}

async fn unregister(
    Id(id): Id,
    Extension(db): Extension<Database>,
    Payload(req): Payload<RegistrationRequest>,
) -> ApiResult<EventResponse> {
    let user_id = req.user_id()?;

    let conn = &mut db.conn().await?;

    find_event(conn, id).await?;
    let deleted = diesel::delete(
        event_participants::table
            .filter(event_participants::event_id.eq(id))
            .filter(event_participants::user_id.eq(user_id)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(AppError::bad_request("User is not registered for this event"));
    }

    Ok(ok_with_message(
        load_event(conn, id).await?,
        "Unregistered from event successfully",
    ))
}

pub fn app() -> Router {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route(
            "/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/events/:id/register", post(register))
        .route("/events/:id/unregister", post(unregister))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_night() -> EventRequest {
        EventRequest {
            title: Some("Launch night".to_string()),
            description: Some("Telescope meetup".to_string()),
            club_id: Some(1),
            date: Some(Utc::now()),
            time: Some("18:00".to_string()),
            duration: Some(90),
            location: Some("Rooftop".to_string()),
            mode: None,
            status: None,
            max_participants: Some(Some(30)),
            images: None,
            tags: Some(vec!["astronomy".to_string()]),
            created_by: Some(1),
        }
    }

    #[test]
    fn complete_event_passes() {
        assert!(launch_night().check(true).is_ok());
    }

    #[test]
    fn capacity_and_duration_must_be_positive() {
        let mut req = launch_night();
        req.max_participants = Some(Some(0));
        req.duration = Some(0);

        let Err(AppError::Validation(errors)) = req.check(true) else {
            panic!("expected validation errors");
        };
        let fields = errors.iter().map(|e| e.field.as_ref()).collect::<Vec<_>>();
        assert_eq!(fields, vec!["duration", "maxParticipants"]);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut req = launch_night();
        req.mode = Some("in-person".to_string());
        assert!(req.check(false).is_err());
    }

    #[test]
    fn null_capacity_is_kept_apart_from_absent() {
        let parse = |body: serde_json::Value| {
            serde_json::from_value::<EventRequest>(body)
                .unwrap()
                .max_participants
        };

        assert_eq!(parse(serde_json::json!({})), None);
        assert_eq!(parse(serde_json::json!({ "maxParticipants": null })), Some(None));
        assert_eq!(parse(serde_json::json!({ "maxParticipants": 12 })), Some(Some(12)));
    }

    #[test]
    fn clearing_capacity_passes_validation() {
        let mut req = launch_night();
        req.max_participants = Some(None);
        assert!(req.check(false).is_ok());
        assert!(req.check(true).is_ok());
    }

    #[test]
    fn response_carries_derived_fields() {
        let now = Utc::now();
        let event = Event {
            id: 4,
            title: "Launch night".to_string(),
            description: "Telescope meetup".to_string(),
            club_id: 1,
            date: now,
            time: "18:00".to_string(),
            duration: 90,
            location: "Rooftop".to_string(),
            mode: "offline".to_string(),
            status: "upcoming".to_string(),
            max_participants: Some(2),
            images: vec![],
            tags: vec![],
            created_by: 1,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(EventResponse::new(event, vec![10, 11])).unwrap();
        assert_eq!(json["participantCount"], 2);
        assert_eq!(json["isFull"], true);
        assert_eq!(json["spotsLeft"], 0);
        assert_eq!(json["maxParticipants"], 2);
    }
}
