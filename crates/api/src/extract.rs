//! Request extractors: bearer-token authentication, plus JSON, path and
//! query extractors that reject through [`ApiError`] so malformed input
//! gets the same `{ success: false, message }` body as every other failure.

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use services::Actor;

use crate::error::ApiError;
use crate::state::AppState;

/// The caller identified by a valid `Authorization: Bearer <jwt>` header.
///
/// Role checks happen in the services, so a valid token of the wrong role
/// ends in 403 rather than 401.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        let actor = state.services.tokens().verify(token)?;
        debug!(user = %actor.id, role = %actor.role, "authenticated request");
        Ok(Self(actor))
    }
}

/// `axum::Json` with rejections answered as 400 in the error envelope.
#[derive(Debug, Clone, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

/// `axum::extract::Path` with rejections answered as 400 in the error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct Path<T>(pub T);

/// `axum::extract::Query` with rejections answered as 400 in the error envelope.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);
