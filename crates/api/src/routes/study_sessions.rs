use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{Activity, CourseId, MaterialId, StudySession, StudySessionId};
use services::study_sessions::DEFAULT_RECENT_SESSIONS;
use services::{EndedSession, SessionStats};

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json, Path, Query};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    course_id: CourseId,
    #[serde(default)]
    activity: Activity,
    #[serde(default)]
    material_id: Option<MaterialId>,
}

#[derive(Debug, Default, Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ActivityRequest {
    #[serde(default)]
    idle: bool,
}

async fn start(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(body): Json<StartRequest>,
) -> ApiResult<ApiResponse<StudySession>> {
    let session = state
        .services
        .study_sessions()
        .start(actor, body.course_id, body.activity, body.material_id)
        .await?;
    Ok(ApiResponse::created(session))
}

async fn recent(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<RecentQuery>,
) -> ApiResult<ApiResponse<Vec<StudySession>>> {
    let sessions = state
        .services
        .study_sessions()
        .recent(actor, query.limit.unwrap_or(DEFAULT_RECENT_SESSIONS))
        .await?;
    Ok(ApiResponse::ok(sessions))
}

async fn active(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<Option<StudySession>>> {
    let session = state.services.study_sessions().active_session(actor).await?;
    Ok(ApiResponse::ok(session))
}

async fn stats(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<SessionStats>> {
    let stats = state.services.study_sessions().stats(actor).await?;
    Ok(ApiResponse::ok(stats))
}

async fn record_activity(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<StudySessionId>,
    body: Option<Json<ActivityRequest>>,
) -> ApiResult<ApiResponse<StudySession>> {
    let Json(body) = body.unwrap_or_default();
    let session = state
        .services
        .study_sessions()
        .record_activity(actor, id, body.idle)
        .await?;
    Ok(ApiResponse::ok(session))
}

async fn end(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<StudySessionId>,
) -> ApiResult<ApiResponse<EndedSession>> {
    let ended = state.services.study_sessions().end(actor, id).await?;
    Ok(ApiResponse::ok(ended))
}

pub fn study_session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/study-sessions", get(recent).post(start))
        .route("/api/study-sessions/active", get(active))
        .route("/api/study-sessions/stats", get(stats))
        .route("/api/study-sessions/:id/activity", post(record_activity))
        .route("/api/study-sessions/:id/end", post(end))
}
