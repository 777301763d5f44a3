#![forbid(unsafe_code)]

pub mod error;
pub mod extract;
pub mod response;
pub mod routes;
pub mod state;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};
pub use extract::AuthUser;
pub use response::ApiResponse;
pub use state::{ApiConfig, AppState};

/// Every route, with tracing, CORS and the upload body limit applied.
pub fn build_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new().allow_origin(AllowOrigin::exact(origin.clone())),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::auth_routes())
        .merge(routes::course_routes())
        .merge(routes::enrollment_routes())
        .merge(routes::material_routes())
        .merge(routes::quiz_routes())
        .merge(routes::progress_routes())
        .merge(routes::study_session_routes())
        .merge(routes::dashboard_routes())
        .merge(routes::subscription_routes())
        .merge(routes::payment_routes())
        .merge(routes::ai_routes())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
