//! End-to-end checks against a real PostgreSQL with migrations applied.
//! Run with `DATABASE_URL=... cargo test --test database -- --ignored`.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use comet_hub::{
    auth::{generate_jwt, Keys},
    config::Config,
    AppState,
};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tower::ServiceExt;

const SECRET: &str = "database-test-secret";

fn app() -> Router {
    let config = Config {
        database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        port: 0,
        environment: "test".to_string(),
        api_version: "v1".to_string(),
        jwt_secret: SECRET.to_string(),
        cors_origins: "*".to_string(),
        cors_origin_suffixes: String::new(),
        rate_limit_max: 10_000,
        rate_limit_window_secs: 900,
        trust_proxy: false,
        db_connect_timeout_secs: 5,
        db_pool_size: 4,
        uploads_dir: "uploads".to_string(),
        log_format: "pretty".to_string(),
    };
    let state = AppState::from_config(&config).unwrap();
    comet_hub::app(&state)
}

/// Short, run-unique suffix so repeated runs do not collide on unique keys.
fn unique(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!(
        "{prefix}{}_{}",
        nanos % 1_000_000,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn admin_token() -> String {
    let keys = Keys::new(SECRET).unwrap();
    generate_jwt(&keys, "admin@comet.dev", Duration::from_secs(300)).unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token()));
    let body = match body {
        Some(body) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create_user(app: &Router) -> (i64, String) {
    let username = unique("cadet");
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "username": username, "email": format!("{username}@comet.dev") })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (body["data"]["id"].as_i64().unwrap(), username)
}

#[tokio::test]
#[ignore]
async fn duplicate_usernames_and_emails_are_field_errors() {
    let app = app();
    let (_, username) = create_user(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "username": username, "email": unique("other") + "@comet.dev" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "username");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "username": unique("other"), "email": format!("{}@COMET.dev", username) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "email");
}

#[tokio::test]
#[ignore]
async fn new_club_has_no_members_and_unique_name() {
    let app = app();
    let club = json!({
        "name": unique("Robotics"),
        "description": "Build things that move",
        "icon": "🤖",
        "color": "#fff",
        "gradient": "from-slate-500 to-zinc-700",
        "createdBy": 1,
    });

    let (status, body) = send(&app, Method::POST, "/api/v1/clubs", Some(club.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["memberCount"], 0);
    assert_eq!(body["data"]["category"], "technical");
    let club_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, Method::POST, "/api/v1/clubs", Some(club)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "name");

    let (user_id, _) = create_user(&app).await;
    let join = format!("/api/v1/clubs/{club_id}/join");
    let (status, body) = send(&app, Method::POST, &join, Some(json!({ "userId": user_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["memberCount"], 1);
    assert_eq!(body["data"]["members"][0]["role"], "member");

    let (status, _) = send(&app, Method::POST, &join, Some(json!({ "userId": user_id }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore]
async fn full_events_refuse_registrations() {
    let app = app();
    let (first, _) = create_user(&app).await;
    let (second, _) = create_user(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/events",
        Some(json!({
            "title": "Launch night",
            "description": "Telescope meetup",
            "clubId": 1,
            "date": "2030-05-01T18:00:00Z",
            "time": "18:00",
            "duration": 90,
            "location": "Rooftop",
            "maxParticipants": 1,
            "createdBy": first,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let event_id = body["data"]["id"].as_i64().unwrap();
    let register = format!("/api/v1/events/{event_id}/register");

    let (status, body) = send(&app, Method::POST, &register, Some(json!({ "userId": first }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isFull"], true);

    let (status, body) = send(&app, Method::POST, &register, Some(json!({ "userId": first }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User is already registered for this event");

    let (status, body) = send(&app, Method::POST, &register, Some(json!({ "userId": second }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Event is full");

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/events/{event_id}"), None).await;
    assert_eq!(body["data"]["participantCount"], 1);
    assert_eq!(body["data"]["participants"], json!([first]));
}

#[tokio::test]
#[ignore]
async fn clearing_the_cap_reopens_a_full_event() {
    let app = app();
    let (first, _) = create_user(&app).await;
    let (second, _) = create_user(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/events",
        Some(json!({
            "title": "Star party",
            "description": "Bring a blanket",
            "clubId": 1,
            "date": "2030-06-01T20:00:00Z",
            "time": "20:00",
            "duration": 120,
            "location": "Field",
            "maxParticipants": 1,
            "createdBy": first,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let event_id = body["data"]["id"].as_i64().unwrap();
    let register = format!("/api/v1/events/{event_id}/register");
    send(&app, Method::POST, &register, Some(json!({ "userId": first }))).await;

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/events/{event_id}"),
        Some(json!({ "title": "Star party (open)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["maxParticipants"], 1);

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/events/{event_id}"),
        Some(json!({ "maxParticipants": null })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["maxParticipants"].is_null());
    assert_eq!(body["data"]["isFull"], false);

    let (status, body) = send(&app, Method::POST, &register, Some(json!({ "userId": second }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["participantCount"], 2);
}

#[tokio::test]
#[ignore]
async fn achievements_unlock_once_and_award_points() {
    let app = app();
    let (user_id, _) = create_user(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/achievements",
        Some(json!({
            "title": unique("First Steps"),
            "description": "Join your first club",
            "icon": "🚀",
            "category": "participation",
            "points": 25,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["criteria"], json!({}));
    let achievement_id = body["data"]["id"].as_i64().unwrap();
    let unlock = format!("/api/v1/achievements/{achievement_id}/unlock");

    let (status, body) = send(&app, Method::POST, &unlock, Some(json!({ "userId": user_id }))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["progress"], 100);

    let (status, body) = send(&app, Method::POST, &unlock, Some(json!({ "userId": user_id }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Achievement already unlocked");

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/users/{user_id}"), None).await;
    assert_eq!(body["data"]["points"], 25);
    assert_eq!(body["data"]["achievements"], json!([achievement_id]));
}

#[tokio::test]
#[ignore]
async fn toggled_notices_leave_the_public_list() {
    let app = app();
    let title = unique("Hackathon");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/notices",
        Some(json!({ "title": title, "description": "Registrations open" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["shouldDisplay"], true);
    let notice_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/notices/{notice_id}/toggle"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);

    let (_, body) = send(&app, Method::GET, "/api/v1/notices", None).await;
    let listed = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n["title"] == title.as_str());
    assert!(!listed);
}

#[tokio::test]
#[ignore]
async fn team_members_are_soft_deleted_and_restored() {
    let app = app();
    let name = unique("Grace");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/team",
        Some(json!({ "name": name, "role": "Faculty Advisor", "category": "faculty" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let member_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/team/{member_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);
    assert_eq!(body["data"]["status"], "inactive");

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/team/{member_id}/restore"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], true);
    assert_eq!(body["data"]["status"], "active");

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/team/{member_id}/permanent"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, &format!("/api/v1/team/{member_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn status_updates_control_public_visibility() {
    let app = app();
    let name = unique("Hopper");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/team",
        Some(json!({ "name": name, "role": "Core Lead", "category": "core" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let member_id = body["data"]["id"].as_i64().unwrap();
    let member = format!("/api/v1/team/{member_id}");
    let listed = |body: &Value| {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["id"].as_i64() == Some(member_id))
    };

    let (status, body) = send(&app, Method::PUT, &member, Some(json!({ "status": "inactive" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], false);
    let (_, body) = send(&app, Method::GET, "/api/v1/team", None).await;
    assert!(!listed(&body));

    let (status, body) = send(&app, Method::PUT, &member, Some(json!({ "status": "alumni" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], true);
    let (_, body) = send(&app, Method::GET, "/api/v1/team", None).await;
    assert!(listed(&body));

    send(&app, Method::DELETE, &format!("{member}/permanent"), None).await;
}
