use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{PaymentRequest, Plan};
use services::PaymentConfirmation;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json, Path};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct QrRequest {
    plan: Plan,
}

async fn create_qr(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(body): Json<QrRequest>,
) -> ApiResult<ApiResponse<PaymentRequest>> {
    let request = state
        .services
        .payments()
        .create_qr_payment(actor.id, body.plan)
        .await?;
    Ok(ApiResponse::created(request))
}

async fn get_payment(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<ApiResponse<PaymentRequest>> {
    let payment = state.services.payments().get(actor.id, &reference).await?;
    Ok(ApiResponse::ok(payment))
}

async fn confirm(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<ApiResponse<PaymentConfirmation>> {
    let confirmation = state
        .services
        .payments()
        .confirm(actor.id, &reference)
        .await?;
    Ok(ApiResponse::ok(confirmation))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/qr", post(create_qr))
        .route("/api/payments/:reference", get(get_payment))
        .route("/api/payments/:reference/confirm", post(confirm))
}
