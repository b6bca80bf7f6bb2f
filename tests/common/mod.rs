// tests/common/mod.rs
#![allow(dead_code)]

use std::net::SocketAddr;

use serde_json::{Value, json};
use suedit::{
    config::Config, db, realtime::RealtimeHub, routes, state::AppState, storage::ObjectStore,
};
use tempfile::TempDir;

pub const PASSWORD: &str = "password123";

/// Upload limit used by the test server; small so oversize bodies are cheap to build.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024;

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    // Database and objects; removed when the test ends.
    _storage: TempDir,
}

/// A registered and logged-in account.
pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Spawns the app on a random port, backed by a fresh database file and a
/// storage directory, both inside one temporary directory.
///
/// The pool has as many connections as the server's, so concurrent requests
/// contend for the write lock the same way they do in production.
pub async fn spawn_app() -> TestApp {
    let storage = TempDir::new().expect("Failed to create storage dir");
    let database_url = format!("sqlite://{}", storage.path().join("suedit.db").display());

    let pool = db::connect(&database_url, 5)
        .await
        .expect("Failed to open test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().unwrap();
    let address = format!("http://{}", addr);

    let config = Config {
        database_url,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        bind_addr: SocketAddr::from(([127, 0, 0, 1], addr.port())),
        rust_log: "error".to_string(),
        log_dir: storage.path().join("logs"),
        storage_dir: storage.path().join("objects"),
        public_base_url: address.clone(),
        max_upload_bytes: MAX_UPLOAD_BYTES,
        feed_page_size: 10,
        cors_origins: vec!["http://localhost:5173".to_string()],
    };

    let objects = ObjectStore::new(&config.storage_dir).expect("Failed to open object store");

    let state = AppState {
        pool,
        config,
        hub: RealtimeHub::new(),
        objects,
    };

    let app = routes::create_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        _storage: storage,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn register(&self, username: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
                "username": username,
            }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn login(&self, username: &str) -> String {
        let body: Value = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
            }))
            .send()
            .await
            .expect("Login failed")
            .json()
            .await
            .expect("Failed to parse login json");

        body["token"].as_str().expect("Token not found").to_string()
    }

    /// Register + login.
    pub async fn sign_up(&self, username: &str) -> TestUser {
        let response = self.register(username).await;
        assert_eq!(response.status().as_u16(), 201, "register {}", username);
        let body: Value = response.json().await.unwrap();
        let token = self.login(username).await;

        TestUser {
            id: body["identity"]["id"].as_str().unwrap().to_string(),
            username: username.to_string(),
            token,
        }
    }

    pub async fn get(&self, path: &str, user: Option<&TestUser>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(user) = user {
            request = request.bearer_auth(&user.token);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str, user: Option<&TestUser>) -> Value {
        let response = self.get(path, user).await;
        assert_eq!(response.status().as_u16(), 200, "GET {}", path);
        response.json().await.unwrap()
    }

    pub async fn create_post(&self, user: &TestUser, content: &str) -> Value {
        let response = self
            .client
            .post(self.url("/api/posts"))
            .bearer_auth(&user.token)
            .json(&json!({ "content": content }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.unwrap()
    }

    pub async fn toggle_like(&self, user: &TestUser, post_id: &str) -> Value {
        let response = self
            .client
            .post(self.url(&format!("/api/posts/{}/like", post_id)))
            .bearer_auth(&user.token)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.unwrap()
    }

    pub async fn notifications(&self, user: &TestUser) -> Vec<Value> {
        let body = self.get_json("/api/notifications", Some(user)).await;
        body.as_array().cloned().unwrap_or_default()
    }
}
