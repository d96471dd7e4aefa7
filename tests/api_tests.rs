//! REST surface tests: envelope shape, auth, status codes.

mod test_helpers;

use axum::http::HeaderValue;
use serde_json::{json, Value};

use matchpool_server::http::create_router;

use test_helpers::{pair_criteria, seed_player, seed_user, test_app};

fn bearer(token: &str) -> HeaderValue {
    format!("Bearer {token}")
        .parse::<HeaderValue>()
        .expect("valid header value")
}

#[tokio::test]
async fn health_endpoint_is_public() {
    let app = test_app().await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn matchmaking_requires_auth() {
    let app = test_app().await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let response = server.get("/matchmaking/status").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let app = test_app().await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let response = server
        .get("/matchmaking/status")
        .add_header(axum::http::header::AUTHORIZATION, bearer("nonsense"))
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");
}

#[tokio::test]
async fn submit_status_cancel_roundtrip() {
    let app = test_app().await;
    let (_alice, token) = seed_player(&app, "alice", 50, 80).await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    // No request yet.
    let empty = server
        .get("/matchmaking/status")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    empty.assert_status_ok();
    let body: Value = empty.json();
    assert_eq!(body["status"], "success");
    assert!(body["data"]["matchRequest"].is_null());

    // Submit.
    let submitted = server
        .post("/matchmaking")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&pair_criteria())
        .await;
    submitted.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = submitted.json();
    let request_id = body["data"]["matchRequest"]["id"]
        .as_str()
        .expect("request id present")
        .to_string();
    assert_eq!(body["data"]["matchRequest"]["status"], "searching");

    // Status now reports queue info.
    let status = server
        .get("/matchmaking/status")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    status.assert_status_ok();
    let body: Value = status.json();
    assert_eq!(body["data"]["matchRequest"]["id"], request_id.as_str());
    assert_eq!(body["data"]["queueInfo"]["position"], 1);
    assert!(body["data"]["queueInfo"]["estimatedWaitTime"].is_number());

    // Duplicate submit conflicts.
    let duplicate = server
        .post("/matchmaking")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&pair_criteria())
        .await;
    duplicate.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = duplicate.json();
    assert_eq!(body["error"]["code"], "ACTIVE_REQUEST_EXISTS");

    // Cancel.
    let cancelled = server
        .delete(&format!("/matchmaking/{request_id}"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    cancelled.assert_status_ok();
    let body: Value = cancelled.json();
    assert_eq!(body["data"]["matchRequest"]["status"], "cancelled");

    // Cancelling again 404s.
    let again = server
        .delete(&format!("/matchmaking/{request_id}"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    again.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_criteria_returns_field_details() {
    let app = test_app().await;
    let (_alice, token) = seed_player(&app, "alice", 50, 80).await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let response = server
        .post("/matchmaking")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&json!({
            "games": [],
            "gameMode": "competitive",
            "regions": [],
            "groupSize": { "min": 4, "max": 2 }
        }))
        .await;
    response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let details = body["error"]["details"].as_array().expect("field details");
    let fields: Vec<&str> = details
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"games"));
    assert!(fields.contains(&"regions"));
    assert!(fields.contains(&"groupSize"));
}

#[tokio::test]
async fn unknown_game_is_a_bad_request() {
    let app = test_app().await;
    let (_alice, token) = seed_player(&app, "alice", 50, 80).await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let mut criteria = pair_criteria();
    criteria.games[0].game_id = "never-heard-of-it".to_string();
    let response = server
        .post("/matchmaking")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&criteria)
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "INVALID_GAME");
}

#[tokio::test]
async fn stats_is_admin_only() {
    let app = test_app().await;
    let (_player, player_token) = seed_player(&app, "alice", 50, 80).await;
    let (_admin, admin_token) = seed_user(
        &app,
        "ops",
        50,
        80,
        matchpool_server::domain::user::UserRole::Admin,
    )
    .await;
    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let forbidden = server
        .get("/matchmaking/stats")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&player_token))
        .await;
    forbidden.assert_status(axum::http::StatusCode::FORBIDDEN);

    let allowed = server
        .get("/matchmaking/stats?hours=24")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&admin_token))
        .await;
    allowed.assert_status_ok();
    let body: Value = allowed.json();
    assert!(body["data"]["queues"].is_array());
    assert!(body["data"]["matches"]["formed"].is_number());
    assert!(body["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn lobby_endpoints_cover_the_flow() {
    let app = test_app().await;
    let (alice, alice_token) = seed_player(&app, "alice", 50, 80).await;
    let (bob, bob_token) = seed_player(&app, "bob", 51, 80).await;

    // Form the lobby through the coordinator.
    app.matchmaking
        .submit(alice, pair_criteria())
        .await
        .unwrap();
    app.matchmaking.submit(bob, pair_criteria()).await.unwrap();
    app.matchmaking.tick().await;
    let lobby_id = app.storage.match_records_for_user(&alice).await.unwrap()[0].lobby_id;

    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let listing = server
        .get("/lobbies")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&alice_token))
        .await;
    listing.assert_status_ok();
    let body: Value = listing.json();
    assert_eq!(body["data"]["lobbies"].as_array().unwrap().len(), 1);

    let ready = server
        .post(&format!("/lobbies/{lobby_id}/ready"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&alice_token))
        .json(&json!({ "ready": true }))
        .await;
    ready.assert_status_ok();

    let ready_bob = server
        .post(&format!("/lobbies/{lobby_id}/ready"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&bob_token))
        .json(&json!({ "ready": true }))
        .await;
    ready_bob.assert_status_ok();
    let body: Value = ready_bob.json();
    assert_eq!(body["data"]["lobby"]["status"], "ready");

    // Bob (not host) cannot start.
    let not_host = server
        .post(&format!("/lobbies/{lobby_id}/start"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&bob_token))
        .await;
    not_host.assert_status(axum::http::StatusCode::FORBIDDEN);

    let started = server
        .post(&format!("/lobbies/{lobby_id}/start"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&alice_token))
        .await;
    started.assert_status_ok();
    let body: Value = started.json();
    assert_eq!(body["data"]["lobby"]["status"], "active");
}

#[tokio::test]
async fn chat_endpoints_post_and_page() {
    let app = test_app().await;
    let (alice, alice_token) = seed_player(&app, "alice", 50, 80).await;
    let (bob, _) = seed_player(&app, "bob", 51, 80).await;
    let (_, outsider_token) = seed_player(&app, "mallory", 50, 10).await;

    app.matchmaking
        .submit(alice, pair_criteria())
        .await
        .unwrap();
    app.matchmaking.submit(bob, pair_criteria()).await.unwrap();
    app.matchmaking.tick().await;
    let lobby_id = app.storage.match_records_for_user(&alice).await.unwrap()[0].lobby_id;

    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let posted = server
        .post(&format!("/chat/lobby/{lobby_id}/messages"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&alice_token))
        .json(&json!({ "content": "anyone warmed up?" }))
        .await;
    posted.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = posted.json();
    assert_eq!(body["data"]["message"]["content"], "anyone warmed up?");

    let history = server
        .get(&format!("/chat/lobby/{lobby_id}/messages?limit=10"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&alice_token))
        .await;
    history.assert_status_ok();
    let body: Value = history.json();
    assert!(body["data"]["chatId"].is_string());
    let messages = body["data"]["messages"].as_array().unwrap();
    assert!(!messages.is_empty());
    assert_eq!(
        messages.last().unwrap()["content"],
        "anyone warmed up?",
        "newest message comes last"
    );

    // Outsiders cannot post or read.
    let outsider_post = server
        .post(&format!("/chat/lobby/{lobby_id}/messages"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&outsider_token))
        .json(&json!({ "content": "hi" }))
        .await;
    outsider_post.assert_status(axum::http::StatusCode::FORBIDDEN);

    let outsider_read = server
        .get(&format!("/chat/lobby/{lobby_id}/messages"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&outsider_token))
        .await;
    outsider_read.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_endpoints_roundtrip() {
    let app = test_app().await;
    let (alice, token) = seed_player(&app, "alice", 50, 80).await;
    let (bob, _) = seed_player(&app, "bob", 51, 80).await;

    // A formed match produces one match-found notification per player.
    app.matchmaking
        .submit(alice, pair_criteria())
        .await
        .unwrap();
    app.matchmaking.submit(bob, pair_criteria()).await.unwrap();
    app.matchmaking.tick().await;

    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");

    let count = server
        .get("/notifications/count")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    count.assert_status_ok();
    let body: Value = count.json();
    assert_eq!(body["data"]["unread"], 1);

    let listing = server
        .get("/notifications?type=match_found")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    listing.assert_status_ok();
    let body: Value = listing.json();
    let notifications = body["data"]["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    let id = notifications[0]["id"].as_str().unwrap().to_string();

    // Mark read twice: second pass modifies nothing.
    let first = server
        .post("/notifications/mark-read")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "notificationIds": [id] }))
        .await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["data"]["modifiedCount"], 1);
    assert_eq!(body["data"]["unread"], 0);

    let second = server
        .post("/notifications/mark-read")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "notificationIds": [id] }))
        .await;
    second.assert_status_ok();
    let body: Value = second.json();
    assert_eq!(body["data"]["modifiedCount"], 0);

    // Settings roundtrip.
    let updated = server
        .put("/notifications/settings")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .json(&json!({
            "matchFound": { "inApp": true, "push": false, "email": true },
            "lobbyInvite": { "inApp": true, "push": true, "email": false },
            "system": { "inApp": true, "push": false, "email": false }
        }))
        .await;
    updated.assert_status_ok();

    let settings = server
        .get("/notifications/settings")
        .add_header(axum::http::header::AUTHORIZATION, bearer(&token))
        .await;
    settings.assert_status_ok();
    let body: Value = settings.json();
    assert_eq!(body["data"]["settings"]["matchFound"]["email"], true);
    assert_eq!(body["data"]["settings"]["matchFound"]["push"], false);
}

#[tokio::test]
async fn lobby_get_is_hidden_from_outsiders() {
    let app = test_app().await;
    let (alice, _) = seed_player(&app, "alice", 50, 80).await;
    let (bob, _) = seed_player(&app, "bob", 51, 80).await;
    let (_, outsider_token) = seed_player(&app, "mallory", 50, 10).await;

    app.matchmaking
        .submit(alice, pair_criteria())
        .await
        .unwrap();
    app.matchmaking.submit(bob, pair_criteria()).await.unwrap();
    app.matchmaking.tick().await;
    let lobby_id = app.storage.match_records_for_user(&alice).await.unwrap()[0].lobby_id;

    let server = axum_test::TestServer::new(create_router(app)).expect("test server should start");
    let response = server
        .get(&format!("/lobbies/{lobby_id}"))
        .add_header(axum::http::header::AUTHORIZATION, bearer(&outsider_token))
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}
