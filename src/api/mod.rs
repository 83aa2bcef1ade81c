//! REST API server
//!
//! Axum-based HTTP API over the task engine, the content store, and the
//! user profiles. All routes are served under `/api/v1`:
//!
//! - `POST /episodes/info` - resolve one episode page to metadata
//! - `POST /episodes/download-url` - resolve one episode page to its audio URL
//! - `POST /episodes/download` - fetch one episode into the content store
//! - `POST /users` / `GET /users` - create and list user profiles
//! - `POST /users/:username/opml` - import an OPML subscription list
//! - `GET /users/:username/subscriptions` - list a user's subscriptions
//! - `GET /users/:username/subscriptions/:index/episodes` - resolve one feed
//! - `POST /users/:username/download-latest` - create a one-shot download task
//! - `POST /users/:username/monitor` - create a long-lived monitor task
//! - `GET /tasks` / `GET /tasks/:id` - inspect task records
//! - `POST /tasks/:id/cancel` / `POST /tasks/:id/check` - task lifecycle
//! - `GET /downloads` and per-file serve/delete/convert operations
//! - `GET /health`, `GET /transcoder`, `GET /openapi.json`, `GET /events`
//!
//! Swagger UI is mounted at `/swagger-ui` when enabled in the config.

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::tasks::TaskManager;
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Build the API router with all routes and middleware configured
pub fn create_router(engine: Arc<TaskManager>, config: Arc<Config>) -> Result<Router> {
    let state = AppState::new(engine, Arc::clone(&config))?;

    let api_routes = Router::new()
        // Episode resolution
        .route("/episodes/info", post(routes::episode_info))
        .route("/episodes/download-url", post(routes::episode_download_url))
        .route("/episodes/download", post(routes::download_episode))
        // Users and subscriptions
        .route("/users", post(routes::create_user).get(routes::list_users))
        .route("/users/:username/opml", post(routes::import_opml))
        .route(
            "/users/:username/subscriptions",
            get(routes::list_subscriptions),
        )
        .route(
            "/users/:username/subscriptions/:index/episodes",
            get(routes::subscription_episodes),
        )
        // Tasks
        .route(
            "/users/:username/download-latest",
            post(routes::create_download_latest),
        )
        .route("/users/:username/monitor", post(routes::create_monitor))
        .route("/tasks", get(routes::list_tasks))
        .route("/tasks/:id", get(routes::get_task))
        .route("/tasks/:id/cancel", post(routes::cancel_task))
        .route("/tasks/:id/check", post(routes::check_task))
        // Downloads
        .route("/downloads", get(routes::list_downloads))
        .route("/downloads/:id/file", get(routes::serve_download))
        .route("/downloads/:id", delete(routes::delete_download))
        .route(
            "/downloads/batch-delete",
            post(routes::batch_delete_downloads),
        )
        .route("/downloads/:id/convert", post(routes::convert_download))
        .route(
            "/downloads/batch-convert",
            post(routes::batch_convert_downloads),
        )
        // System
        .route("/health", get(routes::health_check))
        .route("/transcoder", get(routes::transcoder_info))
        .route("/events", get(routes::event_stream));

    let mut app = Router::new().nest("/api/v1", api_routes);

    // SwaggerUi registers its own handler for the spec URL passed to `url`,
    // so the plain route is mounted only when the UI is disabled.
    if config.server.swagger_ui {
        app = app.merge(
            SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()),
        );
    } else {
        app = app.route("/api/v1/openapi.json", get(routes::openapi_spec));
    }

    let mut app = app.with_state(state);

    if config.server.cors_enabled {
        app = app.layer(build_cors_layer(&config.server.cors_origins));
    }

    Ok(app.layer(tower_http::trace::TraceLayer::new_for_http()))
}

/// Build a CORS layer from the configured origins.
///
/// A `"*"` entry allows any origin; otherwise only the listed origins
/// are allowed.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Bind the configured address and serve the API until the server exits
pub async fn start_api_server(engine: Arc<TaskManager>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.server.bind_address;
    let app = create_router(engine, config)?;

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| Error::ApiServerError(format!("failed to bind {}: {}", bind_address, e)))?;

    info!("API server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ApiServerError(format!("server error: {}", e)))?;

    Ok(())
}
