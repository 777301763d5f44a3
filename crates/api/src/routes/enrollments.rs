use axum::extract::State;
use axum::routing::{delete, get};
use axum::Router;

use learnsy_core::model::{CourseId, Enrollment};
use services::EnrolledCourse;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Path};
use crate::response::ApiResponse;
use crate::state::AppState;

async fn my_enrollments(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<Vec<EnrolledCourse>>> {
    let enrolled = state.services.enrollments().list_for_student(actor).await?;
    Ok(ApiResponse::ok(enrolled))
}

async fn drop_course(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(course_id): Path<CourseId>,
) -> ApiResult<ApiResponse<Enrollment>> {
    let enrollment = state
        .services
        .enrollments()
        .drop_course(actor, course_id)
        .await?;
    Ok(ApiResponse::ok(enrollment))
}

pub fn enrollment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/enrollments", get(my_enrollments))
        .route("/api/enrollments/:course_id", delete(drop_course))
}
