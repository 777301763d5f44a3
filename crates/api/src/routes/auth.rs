use axum::extract::State;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{Profile, Role, User};
use services::AuthSession;

use crate::error::ApiResult;
use crate::extract::{AuthUser, Json};
use crate::response::{ApiResponse, Message};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    profile: Profile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest {
    current_password: String,
    new_password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<ApiResponse<AuthSession>> {
    let session = state
        .services
        .auth()
        .register(
            body.name,
            &body.email,
            &body.password,
            body.role.unwrap_or(Role::Student),
        )
        .await?;
    Ok(ApiResponse::created(session))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<ApiResponse<AuthSession>> {
    let session = state.services.auth().login(&body.email, &body.password).await?;
    Ok(ApiResponse::ok(session))
}

async fn me(State(state): State<AppState>, AuthUser(actor): AuthUser) -> ApiResult<ApiResponse<User>> {
    let user = state.services.auth().current_user(actor.id).await?;
    Ok(ApiResponse::ok(user))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(body): Json<ProfileRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = state
        .services
        .auth()
        .update_profile(actor.id, body.name, body.profile)
        .await?;
    Ok(ApiResponse::ok(user))
}

async fn change_password(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(body): Json<PasswordRequest>,
) -> ApiResult<ApiResponse<Message>> {
    state
        .services
        .auth()
        .change_password(actor.id, &body.current_password, &body.new_password)
        .await?;
    Ok(ApiResponse::message("Password updated"))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/profile", put(update_profile))
        .route("/api/auth/password", post(change_password))
}
