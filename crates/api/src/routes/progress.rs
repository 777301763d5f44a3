use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{CourseId, Progress};
use services::{CourseProgress, LessonCompletion};

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json, Path};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonRequest {
    module_index: usize,
    lesson_index: usize,
}

#[derive(Debug, Deserialize)]
struct StudyTimeRequest {
    seconds: u64,
}

async fn all_progress(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<Vec<CourseProgress>>> {
    let progress = state.services.progress().all_progress(actor).await?;
    Ok(ApiResponse::ok(progress))
}

async fn course_progress(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(course_id): Path<CourseId>,
) -> ApiResult<ApiResponse<CourseProgress>> {
    let progress = state
        .services
        .progress()
        .course_progress(actor, course_id)
        .await?;
    Ok(ApiResponse::ok(progress))
}

async fn complete_lesson(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(course_id): Path<CourseId>,
    Json(body): Json<LessonRequest>,
) -> ApiResult<ApiResponse<LessonCompletion>> {
    let completion = state
        .services
        .progress()
        .complete_lesson(actor, course_id, body.module_index, body.lesson_index)
        .await?;
    Ok(ApiResponse::ok(completion))
}

async fn record_study_time(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(course_id): Path<CourseId>,
    Json(body): Json<StudyTimeRequest>,
) -> ApiResult<ApiResponse<Progress>> {
    let progress = state
        .services
        .progress()
        .record_study_time(actor, course_id, body.seconds)
        .await?;
    Ok(ApiResponse::ok(progress))
}

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/api/progress", get(all_progress))
        .route("/api/progress/:course_id", get(course_progress))
        .route("/api/progress/:course_id/lessons", post(complete_lesson))
        .route("/api/progress/:course_id/study-time", post(record_study_time))
}
