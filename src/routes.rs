// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, interaction, notification, posts, profile, realtime, storage},
    state::AppState,
    utils::jwt::{auth_middleware, optional_auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, profiles, posts, comments, notifications,
///   realtime, storage).
/// * Guards routes with the session middleware; optional-auth routes see the
///   caller when a token is sent and are anonymous otherwise.
/// * Applies global middleware (Trace, CORS) and injects `AppState`.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);
    let required = || middleware::from_fn_with_state(state.clone(), auth_middleware);
    let optional = || middleware::from_fn_with_state(state.clone(), optional_auth_middleware);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout).route_layer(required()))
        .route("/session", get(auth::session).route_layer(optional()));

    let profile_routes = Router::new()
        .route(
            "/me",
            get(profile::get_me)
                .put(profile::update_me)
                .route_layer(required()),
        )
        .route(
            "/me/avatar",
            put(storage::upload_avatar)
                .route_layer(required())
                .layer(upload_limit.clone()),
        )
        .route("/{username}", get(profile::get_profile))
        .route(
            "/{username}/posts",
            get(profile::list_user_posts).route_layer(optional()),
        );

    let post_routes = Router::new()
        .route(
            "/",
            get(posts::list_posts)
                .route_layer(optional())
                .merge(post(posts::create_post).route_layer(required())),
        )
        .route(
            "/images",
            post(storage::upload_post_image)
                .route_layer(required())
                .layer(upload_limit.clone()),
        )
        .route(
            "/{id}",
            get(posts::get_post)
                .route_layer(optional())
                .merge(delete(posts::delete_post).route_layer(required())),
        )
        .route(
            "/{id}/like",
            post(interaction::toggle_like).route_layer(required()),
        )
        .route(
            "/{id}/comments",
            get(interaction::list_comments)
                .merge(post(interaction::create_comment).route_layer(required())),
        );

    let comment_routes = Router::new().route(
        "/{id}",
        delete(interaction::delete_comment).route_layer(required()),
    );

    let notification_routes = Router::new()
        .route("/", get(notification::list_notifications))
        .route("/unread-count", get(notification::unread_count))
        .route("/read-all", post(notification::mark_all_read))
        .route("/{id}/read", post(notification::mark_read))
        .route_layer(required());

    let realtime_routes = Router::new().route(
        "/{resource}",
        get(realtime::subscribe).route_layer(optional()),
    );

    let storage_routes = Router::new().route(
        "/{bucket}/{*path}",
        get(storage::get_object)
            .merge(
                put(storage::put_object)
                    .delete(storage::delete_object)
                    .route_layer(required()),
            )
            .layer(upload_limit),
    );

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/profiles", profile_routes)
        .nest("/api/posts", post_routes)
        .nest("/api/comments", comment_routes)
        .nest("/api/notifications", notification_routes)
        .nest("/api/realtime", realtime_routes)
        .nest("/api/storage", storage_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
