use axum::extract::State;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::MaterialId;
use services::MaterialSummary;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest {
    #[serde(alias = "material_id")]
    material_id: MaterialId,
}

async fn summarize(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(body): Json<SummaryRequest>,
) -> ApiResult<ApiResponse<MaterialSummary>> {
    let summary = state
        .services
        .ai_summary()
        .summarize(actor, body.material_id)
        .await?;
    Ok(ApiResponse::ok(summary))
}

pub fn ai_routes() -> Router<AppState> {
    Router::new().route("/api/ai/summary", post(summarize))
}
