use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

/// Successful reply wrapped as `{ "success": true, "data": ... }`.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

impl ApiResponse<Message> {
    #[must_use]
    pub fn message(message: &'static str) -> Self {
        Self::ok(Message { message })
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Json(Envelope {
            success: true,
            data: self.data,
        });
        (self.status, body).into_response()
    }
}
