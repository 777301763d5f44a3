use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{QuizAttempt, QuizId};
use services::{AttemptResult, QuizView};

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json, Path};
use crate::response::ApiResponse;
use crate::state::AppState;

/// One entry per question; `null` leaves a question unanswered.
#[derive(Debug, Deserialize)]
struct AttemptRequest {
    answers: Vec<Option<usize>>,
}

async fn get_quiz(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<QuizId>,
) -> ApiResult<ApiResponse<QuizView>> {
    let quiz = state.services.quizzes().get_quiz(actor, id).await?;
    Ok(ApiResponse::ok(quiz))
}

async fn list_attempts(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<QuizId>,
) -> ApiResult<ApiResponse<Vec<QuizAttempt>>> {
    let attempts = state.services.quizzes().list_attempts(actor, id).await?;
    Ok(ApiResponse::ok(attempts))
}

async fn submit_attempt(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<QuizId>,
    Json(body): Json<AttemptRequest>,
) -> ApiResult<ApiResponse<AttemptResult>> {
    let result = state
        .services
        .quizzes()
        .submit_attempt(actor, id, body.answers)
        .await?;
    Ok(ApiResponse::created(result))
}

pub fn quiz_routes() -> Router<AppState> {
    Router::new()
        .route("/api/quizzes/:id", get(get_quiz))
        .route(
            "/api/quizzes/:id/attempts",
            get(list_attempts).post(submit_attempt),
        )
}
