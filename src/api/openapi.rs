//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the podcast-dl REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the podcast-dl REST API
///
/// The spec can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "podcast-dl REST API",
        version = "0.1.0",
        description = "REST API for managing podcast subscriptions, download tasks, and stored audio files",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6780/api/v1", description = "Local development server")
    ),
    paths(
        // Episodes
        crate::api::routes::episode_info,
        crate::api::routes::episode_download_url,
        crate::api::routes::download_episode,

        // Users
        crate::api::routes::create_user,
        crate::api::routes::list_users,
        crate::api::routes::import_opml,
        crate::api::routes::list_subscriptions,
        crate::api::routes::subscription_episodes,

        // Tasks
        crate::api::routes::create_download_latest,
        crate::api::routes::create_monitor,
        crate::api::routes::list_tasks,
        crate::api::routes::get_task,
        crate::api::routes::cancel_task,
        crate::api::routes::check_task,

        // Downloads
        crate::api::routes::list_downloads,
        crate::api::routes::serve_download,
        crate::api::routes::delete_download,
        crate::api::routes::batch_delete_downloads,
        crate::api::routes::convert_download,
        crate::api::routes::batch_convert_downloads,

        // System
        crate::api::routes::health_check,
        crate::api::routes::transcoder_info,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::FileId,
        crate::types::Subscription,
        crate::types::Episode,
        crate::types::TaskStatus,
        crate::types::TaskKind,
        crate::types::TaskProgress,
        crate::types::EpisodeResult,
        crate::types::TaskDetail,
        crate::types::Task,
        crate::types::Event,

        // Store and user types
        crate::store::DownloadRecord,
        crate::users::UserProfile,
        crate::users::UserSummary,
        crate::resolver::xiaoyuzhou::EpisodePage,

        // Config types from config.rs
        crate::config::Config,
        crate::config::DownloadConfig,
        crate::config::TranscodeConfig,
        crate::config::MonitorConfig,
        crate::config::ApiConfig,

        // API request/response types from routes
        crate::api::routes::EpisodeUrlRequest,
        crate::api::routes::EpisodeDownloadRequest,
        crate::api::routes::CreateUserRequest,
        crate::api::routes::DownloadLatestRequest,
        crate::api::routes::MonitorRequest,
        crate::api::routes::BatchFileIdsRequest,
        crate::api::routes::TaskCreatedResponse,
        crate::api::routes::OpmlImportResponse,
        crate::api::routes::DownloadsResponse,
        crate::api::routes::BatchDeleteResponse,
        crate::api::routes::BatchConvertFailure,
        crate::api::routes::BatchConvertResponse,
        crate::api::routes::TranscoderInfo,

        // Error types
        crate::error::ErrorCode,
        crate::api::error_response::ApiError,
        crate::api::error_response::ErrorDetail,
    )),
    tags(
        (name = "episodes", description = "Single-episode resolution - Scrape episode pages for metadata and audio URLs"),
        (name = "users", description = "User profiles - Create users and import OPML subscription lists"),
        (name = "tasks", description = "Task engine - Create, inspect, cancel, and force-check download tasks"),
        (name = "downloads", description = "Stored files - List, serve, delete, and convert downloaded audio"),
        (name = "system", description = "System endpoints - Health checks, transcoder info, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
