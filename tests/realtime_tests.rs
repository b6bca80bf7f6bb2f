// tests/realtime_tests.rs

mod common;

use std::time::Duration;

use common::{TestApp, TestUser, spawn_app};
use futures::StreamExt;

/// Opens an SSE stream and returns the response once headers are in, which
/// means the server-side subscription exists.
async fn open_stream(app: &TestApp, path: &str, user: Option<&TestUser>) -> reqwest::Response {
    let response = app.get(path, user).await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    response
}

/// Reads the stream until `needle` shows up or the deadline passes.
async fn read_until(response: reqwest::Response, needle: &str) -> Option<String> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = stream.next().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk.ok()?));
            if buffer.contains(needle) {
                return Some(());
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(())) => Some(buffer),
        _ => None,
    }
}

#[tokio::test]
async fn feed_subscribers_receive_new_posts() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;

    let stream = open_stream(&app, "/api/realtime/posts?event=insert", None).await;
    app.create_post(&alice, "hello realtime").await;

    let received = read_until(stream, "hello realtime")
        .await
        .expect("post insert was not pushed");
    assert!(received.contains("event: insert"));
    assert!(received.contains("\"username\":\"alice\""));
}

#[tokio::test]
async fn notification_stream_requires_a_session() {
    let app = spawn_app().await;

    let response = app.get("/api/realtime/notifications", None).await;
    assert_eq!(response.status().as_u16(), 401);

    let unknown = app.get("/api/realtime/everything", None).await;
    assert_eq!(unknown.status().as_u16(), 404);

    let bad_kind = app.get("/api/realtime/posts?event=upsert", None).await;
    assert_eq!(bad_kind.status().as_u16(), 400);
}

#[tokio::test]
async fn notifications_are_pushed_to_their_recipient() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;
    let post = app.create_post(&alice, "like me").await;

    let stream = open_stream(
        &app,
        "/api/realtime/notifications?event=insert",
        Some(&alice),
    )
    .await;
    app.toggle_like(&bob, post["id"].as_str().unwrap()).await;

    let received = read_until(stream, "bob liked your post")
        .await
        .expect("like notification was not pushed");
    assert!(received.contains("\"type\":\"like\""));
}
