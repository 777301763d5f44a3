use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;

use learnsy_core::model::{Feature, PlanInfo};
use serde::Serialize;
use services::SubscriptionView;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Path};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct FeatureAccess {
    feature: Feature,
    allowed: bool,
}

async fn plans(State(state): State<AppState>) -> ApiResponse<Vec<PlanInfo>> {
    ApiResponse::ok(state.services.subscriptions().plans())
}

async fn current(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<SubscriptionView>> {
    let view = state.services.subscriptions().current(actor.id).await?;
    Ok(ApiResponse::ok(view))
}

async fn cancel(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<SubscriptionView>> {
    let view = state.services.subscriptions().cancel(actor.id).await?;
    Ok(ApiResponse::ok(view))
}

/// 200 when the caller's plan includes `feature`, 403 otherwise.
async fn check_feature(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(feature): Path<Feature>,
) -> ApiResult<ApiResponse<FeatureAccess>> {
    state
        .services
        .subscriptions()
        .check_feature(actor.id, feature)
        .await?;
    Ok(ApiResponse::ok(FeatureAccess {
        feature,
        allowed: true,
    }))
}

pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions/plans", get(plans))
        .route("/api/subscriptions/me", get(current))
        .route("/api/subscriptions/cancel", post(cancel))
        .route("/api/subscriptions/features/:feature", get(check_feature))
}
