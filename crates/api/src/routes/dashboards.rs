use axum::extract::State;
use axum::routing::get;
use axum::Router;

use services::dashboards::StudentInsights;
use services::{FacultyDashboard, StudentDashboard};

use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::response::ApiResponse;
use crate::state::AppState;

async fn student(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<StudentDashboard>> {
    let dashboard = state.services.dashboards().student(actor).await?;
    Ok(ApiResponse::ok(dashboard))
}

/// Premium-only study calendar and per-course breakdown.
async fn insights(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<StudentInsights>> {
    let insights = state.services.dashboards().student_insights(actor).await?;
    Ok(ApiResponse::ok(insights))
}

async fn faculty(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<FacultyDashboard>> {
    let dashboard = state.services.dashboards().faculty(actor).await?;
    Ok(ApiResponse::ok(dashboard))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard/student", get(student))
        .route("/api/dashboard/student/insights", get(insights))
        .route("/api/dashboard/faculty", get(faculty))
}
