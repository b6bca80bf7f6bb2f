// tests/interaction_tests.rs

mod common;

use common::spawn_app;
use serde_json::{Value, json};

#[tokio::test]
async fn like_notifies_the_author_and_toggles_back() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;

    let post = app.create_post(&alice, "hello world").await;
    let post_id = post["id"].as_str().unwrap();

    let liked = app.toggle_like(&bob, post_id).await;
    assert_eq!(liked["liked"], true);
    assert_eq!(liked["likes_count"], 1);

    let as_bob = app.get_json(&format!("/api/posts/{}", post_id), Some(&bob)).await;
    assert_eq!(as_bob["likes_count"], 1);
    assert_eq!(as_bob["user_has_liked"], true);
    let as_alice = app.get_json(&format!("/api/posts/{}", post_id), Some(&alice)).await;
    assert_eq!(as_alice["user_has_liked"], false);

    let notifications = app.notifications(&alice).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"], "like");
    assert_eq!(notifications[0]["message"], "bob liked your post");
    assert_eq!(notifications[0]["actor_id"], bob.id.as_str());
    assert_eq!(notifications[0]["post_id"], post_id);
    assert_eq!(notifications[0]["is_read"], false);

    let unliked = app.toggle_like(&bob, post_id).await;
    assert_eq!(unliked["liked"], false);
    assert_eq!(unliked["likes_count"], 0);

    let after = app.get_json(&format!("/api/posts/{}", post_id), Some(&bob)).await;
    assert_eq!(after["likes_count"], 0);
    assert_eq!(after["user_has_liked"], false);
}

#[tokio::test]
async fn liking_your_own_post_is_silent() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let post = app.create_post(&alice, "me, myself").await;

    let liked = app.toggle_like(&alice, post["id"].as_str().unwrap()).await;
    assert_eq!(liked["likes_count"], 1);
    assert!(app.notifications(&alice).await.is_empty());
}

#[tokio::test]
async fn liking_a_missing_post_is_not_found() {
    let app = spawn_app().await;
    let bob = app.sign_up("bob").await;

    let response = app
        .client
        .post(app.url(&format!("/api/posts/{}/like", uuid::Uuid::new_v4())))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn new_posts_notify_everyone_else() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;
    let carol = app.sign_up("carol").await;

    let post = app.create_post(&alice, "announcement").await;

    for user in [&bob, &carol] {
        let notifications = app.notifications(user).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["type"], "new_post");
        assert_eq!(notifications[0]["message"], "alice published a new post");
        assert_eq!(notifications[0]["post_id"], post["id"]);
    }
    assert!(app.notifications(&alice).await.is_empty());
}

#[tokio::test]
async fn comments_flow() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;
    let post = app.create_post(&alice, "talk to me").await;
    let post_id = post["id"].as_str().unwrap();
    let comments_url = app.url(&format!("/api/posts/{}/comments", post_id));

    let empty = app
        .client
        .post(&comments_url)
        .bearer_auth(&bob.token)
        .json(&json!({ "content": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status().as_u16(), 400);

    let mut ids = Vec::new();
    for (user, text) in [(&bob, "first!"), (&alice, "thanks")] {
        let response = app
            .client
            .post(&comments_url)
            .bearer_auth(&user.token)
            .json(&json!({ "content": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let comment: Value = response.json().await.unwrap();
        assert_eq!(comment["profile"]["username"], user.username.as_str());
        ids.push(comment["id"].as_str().unwrap().to_string());
    }

    let listed = app
        .get_json(&format!("/api/posts/{}/comments", post_id), None)
        .await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["content"], "first!");
    assert_eq!(listed[1]["content"], "thanks");

    let counted = app.get_json(&format!("/api/posts/{}", post_id), None).await;
    assert_eq!(counted["comments_count"], 2);

    // Only bob's comment notified alice; her own reply did not.
    let notifications = app.notifications(&alice).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"], "comment");
    assert_eq!(notifications[0]["message"], "bob commented on your post");

    let forbidden = app
        .client
        .delete(app.url(&format!("/api/comments/{}", ids[0])))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status().as_u16(), 403);

    let deleted = app
        .client
        .delete(app.url(&format!("/api/comments/{}", ids[0])))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status().as_u16(), 204);

    let counted = app.get_json(&format!("/api/posts/{}", post_id), None).await;
    assert_eq!(counted["comments_count"], 1);
}

#[tokio::test]
async fn notifications_can_be_marked_read() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;

    let first = app.create_post(&alice, "one").await;
    let second = app.create_post(&alice, "two").await;
    app.toggle_like(&bob, first["id"].as_str().unwrap()).await;
    app.toggle_like(&bob, second["id"].as_str().unwrap()).await;

    let count = app.get_json("/api/notifications/unread-count", Some(&alice)).await;
    assert_eq!(count["unread"], 2);

    let notifications = app.notifications(&alice).await;
    // Newest first.
    assert_eq!(notifications[0]["post_id"], second["id"]);
    let id = notifications[0]["id"].as_str().unwrap();

    // Bob cannot touch alice's notification.
    let foreign = app
        .client
        .post(app.url(&format!("/api/notifications/{}/read", id)))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status().as_u16(), 404);

    let read: Value = app
        .client
        .post(app.url(&format!("/api/notifications/{}/read", id)))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["is_read"], true);

    let count = app.get_json("/api/notifications/unread-count", Some(&alice)).await;
    assert_eq!(count["unread"], 1);
    let unread = app
        .get_json("/api/notifications?unread_only=true", Some(&alice))
        .await;
    assert_eq!(unread.as_array().unwrap().len(), 1);

    let all: Value = app
        .client
        .post(app.url("/api/notifications/read-all"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["updated"], 1);

    let count = app.get_json("/api/notifications/unread-count", Some(&alice)).await;
    assert_eq!(count["unread"], 0);
    assert_eq!(app.notifications(&alice).await.len(), 2);
}

#[tokio::test]
async fn concurrent_likes_are_all_counted() {
    let app = spawn_app().await;
    let alice = app.sign_up("alice").await;
    let post = app.create_post(&alice, "like me").await;
    let post_id = post["id"].as_str().unwrap();

    let mut likers = Vec::new();
    for i in 0..7 {
        likers.push(app.sign_up(&format!("liker_{}", i)).await);
    }

    // Seven writers against a five-connection pool; none may fail with a busy database.
    let likes = likers.iter().map(|liker| {
        app.client
            .post(app.url(&format!("/api/posts/{}/like", post_id)))
            .bearer_auth(&liker.token)
            .send()
    });
    for response in futures::future::join_all(likes).await {
        assert_eq!(response.unwrap().status().as_u16(), 200);
    }

    let after = app.get_json(&format!("/api/posts/{}", post_id), None).await;
    assert_eq!(after["likes_count"], 7);
    assert_eq!(app.notifications(&alice).await.len(), 7);
}
