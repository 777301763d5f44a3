use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use learnsy_core::model::{Material, MaterialId};
use services::CompletionToggle;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Path};
use crate::response::{ApiResponse, Message};
use crate::state::AppState;

async fn get_material(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<MaterialId>,
) -> ApiResult<ApiResponse<Material>> {
    let material = state.services.materials().get_for_viewer(actor, id).await?;
    Ok(ApiResponse::ok(material))
}

async fn delete_material(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<MaterialId>,
) -> ApiResult<ApiResponse<Message>> {
    state.services.materials().delete_material(actor, id).await?;
    Ok(ApiResponse::message("Material deleted"))
}

/// Raw file bytes, outside the JSON envelope.
async fn download(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<MaterialId>,
) -> ApiResult<Response> {
    let file = state.services.materials().read_file(actor, id).await?;
    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace(['"', '\\'], "_")
    ))
    .unwrap_or(HeaderValue::from_static("attachment"));
    Ok((
        [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
        file.bytes,
    )
        .into_response())
}

async fn toggle_completion(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<MaterialId>,
) -> ApiResult<ApiResponse<CompletionToggle>> {
    let toggle = state.services.materials().toggle_completion(actor, id).await?;
    Ok(ApiResponse::ok(toggle))
}

pub fn material_routes() -> Router<AppState> {
    Router::new()
        .route("/api/materials/:id", get(get_material).delete(delete_material))
        .route("/api/materials/:id/download", get(download))
        .route("/api/materials/:id/complete", post(toggle_completion))
}
